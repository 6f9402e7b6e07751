//! Credential probing.
//!
//! Sends the cheapest possible request with each key and reports which keys
//! can be used for a run. A rate-limited key is usable: it authenticated,
//! it is just out of quota right now.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::providers::ClassifyProvider;
use crate::{CartographeError, Result};

/// Pause between two probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on recommended parallel workers.
pub const MAX_RECOMMENDED_WORKERS: usize = 4;

/// Per-key share of the recommended per-minute quota.
pub const QUOTA_PER_KEY: u32 = 15;

/// Result of probing one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    Valid,
    RateLimited,
    Rejected,
    Failed(String),
}

impl KeyState {
    pub fn is_usable(&self) -> bool {
        matches!(self, KeyState::Valid | KeyState::RateLimited)
    }

    fn from_probe(result: Result<()>) -> Self {
        match result {
            Ok(()) => KeyState::Valid,
            Err(CartographeError::RateLimited { .. }) => KeyState::RateLimited,
            Err(CartographeError::AuthenticationFailed) => KeyState::Rejected,
            Err(e) => KeyState::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyStatus {
    /// Position in the configured key list, from 1.
    pub index: usize,
    pub masked: String,
    pub state: KeyState,
    pub elapsed: Duration,
}

/// Outcome of a probe pass.
#[derive(Debug, Clone, Default)]
pub struct KeyReport {
    pub statuses: Vec<KeyStatus>,
}

impl KeyReport {
    pub fn usable(&self) -> usize {
        self.statuses.iter().filter(|s| s.state.is_usable()).count()
    }

    pub fn recommended_workers(&self) -> usize {
        self.usable().min(MAX_RECOMMENDED_WORKERS)
    }

    pub fn recommended_quota_per_minute(&self) -> u32 {
        u32::try_from(self.usable())
            .unwrap_or(u32::MAX)
            .saturating_mul(QUOTA_PER_KEY)
    }
}

/// Probe every key with a provider built by `make_provider`.
pub async fn check_keys<F>(keys: &[String], make_provider: F) -> Result<KeyReport>
where
    F: Fn(&str) -> Arc<dyn ClassifyProvider>,
{
    if keys.is_empty() {
        return Err(CartographeError::NoCredentials);
    }

    let mut report = KeyReport::default();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
        let masked = mask(key);
        let provider = make_provider(key);

        let start = Instant::now();
        let state = KeyState::from_probe(provider.probe().await);
        let elapsed = start.elapsed();

        match &state {
            KeyState::Valid => info!(key = %masked, elapsed_ms = elapsed.as_millis() as u64, "key is valid"),
            KeyState::RateLimited => warn!(key = %masked, "key is rate limited but usable"),
            KeyState::Rejected => warn!(key = %masked, "key was rejected"),
            KeyState::Failed(reason) => warn!(key = %masked, reason = %reason, "probe failed"),
        }
        report.statuses.push(KeyStatus {
            index: i + 1,
            masked,
            state,
            elapsed,
        });
    }

    info!(
        tested = keys.len(),
        usable = report.usable(),
        recommended_workers = report.recommended_workers(),
        recommended_quota_per_minute = report.recommended_quota_per_minute(),
        "key check complete"
    );
    Ok(report)
}

/// Keep the first and last four characters of a key.
pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
