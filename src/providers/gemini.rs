//! Gemini `generateContent` client.
//!
//! Talks to the Generative Language REST API directly over reqwest.
//! See: <https://ai.google.dev/api/generate-content>
//!
//! HTTP failures are mapped onto [`CartographeError`] from the status code
//! and the structured error body, so the retry wrapper never has to look at
//! message text.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::ClassifyProvider;
use crate::prompt::{self, JSON_CLOSE};
use crate::telemetry;
use crate::types::{ClassificationResult, CompanyRecord};
use crate::validation;
use crate::{CartographeError, Result};

/// Default base URL for the Generative Language API
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Generation parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    /// Sampling temperature. Default: 0.05 (near-deterministic formatting).
    pub temperature: f32,
    /// Output token ceiling. Default: 2048.
    pub max_output_tokens: u32,
    /// Let the model ground its answer with web search. Default: false.
    pub search_grounding: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.05,
            max_output_tokens: 2048,
            search_grounding: false,
        }
    }
}

/// Client for one Gemini model bound to one API key.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    http: Client,
    base_url: String,
    settings: GenerationSettings,
}

impl GeminiClient {
    /// Create a client for `model` authenticated with `api_key`.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settings: GenerationSettings::default(),
        }
    }

    /// Override the generation parameters.
    pub fn settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Model identifier this client calls.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt and return the concatenated candidate text.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                candidate_count: 1,
                stop_sequences: vec![JSON_CLOSE],
                max_output_tokens: self.settings.max_output_tokens,
            },
            tools: self
                .settings
                .search_grounding
                .then(|| vec![Tool::google_search()]),
        };

        let start = Instant::now();
        let outcome = self.send(&url, &body).await;
        let status = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::CALLS_TOTAL,
            "model" => self.model.clone(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::CALL_DURATION_SECONDS, "model" => self.model.clone())
            .record(start.elapsed().as_secs_f64());
        outcome
    }

    async fn send(&self, url: &str, body: &GenerateRequest<'_>) -> Result<String> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CartographeError::Http(e.to_string()))?;

        let response = Self::handle_response_errors(response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| CartographeError::Http(e.to_string()))?;
        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| CartographeError::Parse(format!("malformed response envelope: {e}")))?;

        parsed.into_text()
    }

    /// Check response status and map to appropriate error.
    async fn handle_response_errors(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let header_retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|e| e.error)
            .unwrap_or_default();
        let message = detail
            .message
            .clone()
            .unwrap_or_else(|| format!("Gemini API error: {status}"));

        Err(match status.as_u16() {
            429 => CartographeError::RateLimited {
                retry_after: header_retry_after.or_else(|| detail.retry_delay()),
            },
            401 | 403 => CartographeError::AuthenticationFailed,
            400 if detail.has_reason("API_KEY_INVALID") => CartographeError::AuthenticationFailed,
            400 => CartographeError::BadRequest(message),
            code => CartographeError::Api {
                status: code,
                message,
            },
        })
    }
}

/// Parse a protobuf JSON duration such as `"37s"` or `"1.5s"`.
pub(crate) fn parse_proto_duration(text: &str) -> Option<Duration> {
    let secs: f64 = text.trim().strip_suffix('s')?.parse().ok()?;
    if secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content>,
    generation_config: GenerationConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    candidate_count: u32,
    stop_sequences: Vec<&'a str>,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct Tool {
    google_search: serde_json::Map<String, serde_json::Value>,
}

impl Tool {
    fn google_search() -> Self {
        Self {
            google_search: serde_json::Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

impl GenerateResponse {
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(CartographeError::ContentFiltered { reason });
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(CartographeError::EmptyResponse)?;

        let text: String = candidate
            .content
            .unwrap_or_default()
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return match candidate.finish_reason {
                Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
                    Err(CartographeError::ContentFiltered { reason })
                }
                _ => Err(CartographeError::EmptyResponse),
            };
        }
        Ok(text)
    }
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Deserialize, Default)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

impl ApiErrorDetail {
    /// `RetryInfo.retryDelay` from the error details, if present.
    fn retry_delay(&self) -> Option<Duration> {
        self.details
            .iter()
            .filter(|d| type_url(d).is_some_and(|t| t.ends_with("google.rpc.RetryInfo")))
            .find_map(|d| d.get("retryDelay")?.as_str().and_then(parse_proto_duration))
    }

    /// Whether an `ErrorInfo` detail carries the given reason code.
    fn has_reason(&self, reason: &str) -> bool {
        self.details.iter().any(|d| {
            type_url(d).is_some_and(|t| t.ends_with("google.rpc.ErrorInfo"))
                && d.get("reason").and_then(|r| r.as_str()) == Some(reason)
        })
    }
}

fn type_url(detail: &serde_json::Value) -> Option<&str> {
    detail.get("@type")?.as_str()
}

// ============================================================================
// Provider Trait Implementation
// ============================================================================

#[async_trait]
impl ClassifyProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn classify(&self, company: &CompanyRecord) -> Result<ClassificationResult> {
        let prompt = prompt::render(company);
        let raw = self.generate(&prompt).await?;
        debug!(company = %company.name, chars = raw.len(), "received model response");
        validation::parse_response(&raw)
    }

    async fn probe(&self) -> Result<()> {
        self.generate(prompt::PROBE).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proto_durations() {
        assert_eq!(parse_proto_duration("37s"), Some(Duration::from_secs(37)));
        assert_eq!(
            parse_proto_duration("1.5s"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_proto_duration("37"), None);
        assert_eq!(parse_proto_duration("-1s"), None);
    }

    #[test]
    fn retry_delay_from_error_details() {
        let body = serde_json::json!({
            "error": {
                "code": 429,
                "message": "quota exceeded",
                "status": "RESOURCE_EXHAUSTED",
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.QuotaFailure"},
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "12s"}
                ]
            }
        });
        let env: ApiErrorEnvelope = serde_json::from_value(body).unwrap();
        assert_eq!(env.error.retry_delay(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn invalid_key_reason_detected() {
        let body = serde_json::json!({
            "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "API_KEY_INVALID"}
                ]
            }
        });
        let env: ApiErrorEnvelope = serde_json::from_value(body).unwrap();
        assert!(env.error.has_reason("API_KEY_INVALID"));
        assert!(!env.error.has_reason("RATE_LIMIT_EXCEEDED"));
    }

    #[test]
    fn blocked_prompt_is_content_filtered() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(matches!(
            resp.into_text(),
            Err(CartographeError::ContentFiltered { reason }) if reason == "SAFETY"
        ));
    }

    #[test]
    fn candidate_parts_are_concatenated() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "### RESULT\n"}, {"text": "<JSON>{}"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(resp.into_text().unwrap(), "### RESULT\n<JSON>{}");
    }

    #[test]
    fn no_candidates_is_empty_response() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(matches!(resp.into_text(), Err(CartographeError::EmptyResponse)));
    }
}
