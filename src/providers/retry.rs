//! Retry configuration, delay calculation, and the retrying decorator.
//!
//! Provides [`RetryConfig`] for controlling retry behaviour and
//! [`RetryingClassifyProvider`], which wraps any [`ClassifyProvider`] with
//! automatic retry on retryable errors (transient transport failures and
//! unparseable model output). Fatal errors pass straight through.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::traits::ClassifyProvider;
use crate::telemetry;
use crate::types::{ClassificationResult, CompanyRecord};
use crate::{CartographeError, Result};

/// Configuration for retry behaviour on retryable errors.
///
/// Uses exponential backoff: the delay before retry `n` (0-indexed) is
/// `initial_delay * multiplier^n`, capped at `max_delay`.
///
/// ```rust
/// # use cartographe::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new(5, Duration::from_secs(2))
///     .multiplier(2.0)
///     .max_delay(Duration::from_secs(120));
/// assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub initial_delay: Duration,
    /// Expansion factor applied per attempt.
    pub multiplier: f64,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Doubling backoff from `initial_delay`, uncapped until
    /// [`max_delay`](Self::max_delay) is set.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier: 2.0,
            max_delay: Duration::MAX,
        }
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Set the expansion factor.
    pub fn multiplier(mut self, factor: f64) -> Self {
        self.multiplier = factor;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Calculate the effective delay, respecting provider `retry_after` hints.
    ///
    /// If a `retry_after` duration is provided (from a `RateLimited` error),
    /// it takes precedence over the calculated backoff.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

// ============================================================================
// Shared retry helper
// ============================================================================

/// Execute an async operation with retry logic.
///
/// Retries errors whose [`ErrorClass`](crate::ErrorClass) is retryable up
/// to `config.max_attempts`, sleeping between attempts. Fatal errors are
/// returned immediately. On exhaustion the last error is returned.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    provider_name: &str,
    subject: &str,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() => {
                if attempt + 1 < config.max_attempts {
                    metrics::counter!(telemetry::RETRIES_TOTAL,
                        "provider" => provider_name.to_owned(),
                        "class" => format!("{:?}", e.class()).to_lowercase(),
                    )
                    .increment(1);
                    let delay = config.effective_delay(attempt, e.retry_after());
                    warn!(
                        provider = provider_name,
                        subject,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after retryable error"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!(
                        provider = provider_name,
                        subject,
                        attempts = config.max_attempts,
                        error = %e,
                        "retries exhausted"
                    );
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e), // fatal error, no retry
        }
    }
    Err(last_err.unwrap_or_else(|| {
        CartographeError::Configuration("retry policy allows zero attempts".to_string())
    }))
}

// ============================================================================
// RetryingClassifyProvider
// ============================================================================

/// Decorator that wraps a [`ClassifyProvider`] with retry logic.
pub struct RetryingClassifyProvider {
    inner: Arc<dyn ClassifyProvider>,
    config: RetryConfig,
}

impl RetryingClassifyProvider {
    /// Wrap a classify provider with retry logic.
    pub fn new(inner: Arc<dyn ClassifyProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl ClassifyProvider for RetryingClassifyProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn classify(&self, company: &CompanyRecord) -> Result<ClassificationResult> {
        with_retry(&self.config, self.inner.name(), &company.name, || {
            self.inner.classify(company)
        })
        .await
    }

    // Probing reports the credential's state; retrying would hide it.
    async fn probe(&self) -> Result<()> {
        self.inner.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(16));
    }

    #[test]
    fn delay_is_capped() {
        let config = RetryConfig::new(50, Duration::from_secs(1)).max_delay(Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let config = RetryConfig::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::MAX);
    }

    #[test]
    fn custom_multiplier() {
        let config = RetryConfig::new(5, Duration::from_millis(100)).multiplier(3.0);
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(900));
    }

    #[test]
    fn retry_after_hint_wins() {
        let config = RetryConfig::new(3, Duration::from_secs(2));
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
        assert_eq!(config.effective_delay(1, None), Duration::from_secs(4));
    }
}
