//! Strict validation of model output.
//!
//! The model answers with free-form reasoning followed by a
//! `<JSON>…</JSON>` block. [`parse_response`] locates that block, repairs
//! the handful of formatting slips models commonly make, and deserializes
//! it against the classification schema. Anything else is a
//! [`CartographeError::Parse`], which the retry wrapper treats as
//! retryable.
//!
//! # Extraction order
//!
//! 1. Text after `<JSON>` up to `</JSON>`. The closing tag doubles as the
//!    stop sequence, so it is usually absent and the block runs to the end
//!    of the text.
//! 2. Without tags, the first balanced `{…}` object in the text.
//!
//! # Repairs
//!
//! Only syntax noise is repaired: markdown fences, doubled braces left over
//! from template escaping, and trailing commas. Field values are never
//! guessed; a missing key is an error.

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::prompt::{JSON_CLOSE, JSON_OPEN};
use crate::types::{ClassificationResult, Layer, is_known_category};
use crate::{CartographeError, Result};

/// Parse and validate a raw model response.
pub fn parse_response(raw: &str) -> Result<ClassificationResult> {
    let block = extract_block(raw)
        .ok_or_else(|| CartographeError::Parse("no JSON block found".to_string()))?;
    let parsed = deserialize_block(block)?;
    validate(parsed)
}

/// Locate the JSON block inside a model response.
pub fn extract_block(raw: &str) -> Option<&str> {
    if let Some(start) = raw.find(JSON_OPEN) {
        let rest = &raw[start + JSON_OPEN.len()..];
        let inner = match rest.find(JSON_CLOSE) {
            Some(end) => &rest[..end],
            None => rest,
        };
        let inner = strip_fences(inner.trim());
        if !inner.is_empty() {
            return Some(inner);
        }
    }
    first_object(raw)
}

fn strip_fences(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// First balanced `{…}` object, skipping braces inside string literals.
fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn deserialize_block(block: &str) -> Result<RawClassification> {
    let first_err = match serde_json::from_str::<RawClassification>(block) {
        Ok(parsed) => return Ok(parsed),
        Err(e) => e,
    };
    // Well-formed JSON with the wrong shape will not improve with repairs.
    if first_err.is_data() {
        return Err(CartographeError::Parse(first_err.to_string()));
    }

    let repaired = repair(block);
    serde_json::from_str::<RawClassification>(&repaired)
        .map_err(|e| CartographeError::Parse(format!("{e} (before repair: {first_err})")))
}

/// Undo doubled braces and drop trailing commas outside string literals.
pub(crate) fn repair(block: &str) -> String {
    let mut text = block.trim();
    while text.starts_with("{{") && text.ends_with("}}") {
        text = &text[1..text.len() - 1];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Wire shape of the result block. Every classification key is required;
/// `layer` and `category` may be `null` but must be present.
#[derive(Debug, Deserialize)]
struct RawClassification {
    is_startup: bool,
    is_startup_confidence: f64,
    is_gen_ai_startup: bool,
    is_gen_ai_startup_confidence: f64,
    #[serde(deserialize_with = "nullable")]
    layer: Option<String>,
    layer_confidence: f64,
    #[serde(deserialize_with = "nullable")]
    category: Option<String>,
    category_confidence: f64,
    is_linked_to_france: bool,
    is_linked_to_france_confidence: f64,
    #[serde(default)]
    startup_rationale: Option<String>,
    #[serde(default)]
    gen_ai_rationale: Option<String>,
}

// With `deserialize_with`, serde no longer defaults a missing Option to None.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

fn validate(raw: RawClassification) -> Result<ClassificationResult> {
    for (field, value) in [
        ("is_startup_confidence", raw.is_startup_confidence),
        ("is_gen_ai_startup_confidence", raw.is_gen_ai_startup_confidence),
        ("layer_confidence", raw.layer_confidence),
        ("category_confidence", raw.category_confidence),
        ("is_linked_to_france_confidence", raw.is_linked_to_france_confidence),
    ] {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(CartographeError::Parse(format!(
                "{field} out of range [0, 100]: {value}"
            )));
        }
    }

    let layer = match non_empty(raw.layer) {
        Some(text) => Some(text.parse::<Layer>().map_err(CartographeError::Parse)?),
        None => None,
    };

    let category = non_empty(raw.category);
    if let Some(category) = &category {
        if !is_known_category(category) {
            warn!(category = %category, "model returned a category outside the fixed list");
        }
    }

    Ok(ClassificationResult {
        is_startup: raw.is_startup,
        is_startup_confidence: raw.is_startup_confidence,
        is_gen_ai_startup: raw.is_gen_ai_startup,
        is_gen_ai_startup_confidence: raw.is_gen_ai_startup_confidence,
        layer,
        layer_confidence: raw.layer_confidence,
        category,
        category_confidence: raw.category_confidence,
        is_linked_to_france: raw.is_linked_to_france,
        is_linked_to_france_confidence: raw.is_linked_to_france_confidence,
        startup_rationale: raw.startup_rationale,
        gen_ai_rationale: raw.gen_ai_rationale,
    })
}

/// Treat blank and "N/A" strings like `null`.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("n/a"))
}
