//! Company records read from the input tables.

use serde::{Deserialize, Serialize};

/// Canonical form of a company name: line breaks become spaces and outer
/// whitespace is trimmed.
///
/// Tables, name logs and the output table all key companies by this form.
pub fn normalize_name(name: &str) -> String {
    name.replace("\r\n", " ")
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string()
}

/// One company to classify. The name is the unique key across every store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub name: String,
    pub description: String,
}

impl CompanyRecord {
    /// The name is stored in its [`normalize_name`] form.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: normalize_name(&name.into()),
            description: description.into(),
        }
    }

    /// Whether the record carries a non-blank description.
    pub fn has_description(&self) -> bool {
        !self.description.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_breaks_in_names_become_spaces() {
        assert_eq!(normalize_name("Beta\nLabs"), "Beta Labs");
        assert_eq!(normalize_name("Beta\r\nLabs"), "Beta Labs");
        assert_eq!(normalize_name("  Acme\r"), "Acme");
    }

    #[test]
    fn record_name_is_normalized() {
        let record = CompanyRecord::new(" Beta\nLabs ", "Agents\nfor labs");
        assert_eq!(record.name, "Beta Labs");
        assert_eq!(record.description, "Agents\nfor labs");
    }
}
