//! Classification payload returned by the model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed category vocabulary offered to the model.
pub const CATEGORIES: &[&str] = &[
    "Content",
    "Customer Service",
    "Cyber Security",
    "Data",
    "DefTech",
    "Dev Tools",
    "Development",
    "EdTech",
    "Enterprise Platforms",
    "Gaming",
    "HealthTech",
    "Knowledge Workers",
    "LegalTech",
    "Marketing",
    "Note Taker",
    "RFP",
    "Safety",
    "SalesTech",
    "Science",
    "HRTech",
    "Consumer/Social",
];

/// Whether `category` is one of [`CATEGORIES`] (exact match).
pub fn is_known_category(category: &str) -> bool {
    CATEGORIES.contains(&category)
}

/// Position of a Gen-AI company in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Builds the models themselves.
    Foundational,
    /// Tooling and platforms for people building on models.
    Infrastructure,
    /// End-user products powered by models.
    Application,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundational => "Foundational",
            Self::Infrastructure => "Infrastructure",
            Self::Application => "Application",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    /// Case-insensitive; tolerates a trailing " layer".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let word = trimmed
            .strip_suffix(" layer")
            .or_else(|| trimmed.strip_suffix(" Layer"))
            .unwrap_or(trimmed);
        [Self::Foundational, Self::Infrastructure, Self::Application]
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(word))
            .ok_or_else(|| format!("unknown layer '{s}'"))
    }
}

/// Validated classification of one company.
///
/// `layer` and `category` are `None` when the model judged the information
/// insufficient (typically for companies that are not Gen-AI startups).
/// Confidences are on a 0–100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_startup: bool,
    pub is_startup_confidence: f64,
    pub is_gen_ai_startup: bool,
    pub is_gen_ai_startup_confidence: f64,
    pub layer: Option<Layer>,
    pub layer_confidence: f64,
    pub category: Option<String>,
    pub category_confidence: f64,
    pub is_linked_to_france: bool,
    pub is_linked_to_france_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_ai_rationale: Option<String>,
}

impl ClassificationResult {
    /// Only startups built on generative AI make it into the output table.
    pub fn is_eligible(&self) -> bool {
        self.is_startup && self.is_gen_ai_startup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_parses_case_insensitively() {
        assert_eq!("application".parse::<Layer>(), Ok(Layer::Application));
        assert_eq!("INFRASTRUCTURE".parse::<Layer>(), Ok(Layer::Infrastructure));
        assert_eq!(" Foundational ".parse::<Layer>(), Ok(Layer::Foundational));
        assert_eq!("Application layer".parse::<Layer>(), Ok(Layer::Application));
    }

    #[test]
    fn layer_rejects_unknown() {
        assert!("Platform".parse::<Layer>().is_err());
        assert!("".parse::<Layer>().is_err());
    }

    #[test]
    fn layer_display_matches_output_table() {
        assert_eq!(Layer::Infrastructure.to_string(), "Infrastructure");
    }

    #[test]
    fn known_categories() {
        assert_eq!(CATEGORIES.len(), 21);
        assert!(is_known_category("Consumer/Social"));
        assert!(!is_known_category("consumer/social"));
    }
}
