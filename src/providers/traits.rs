//! Provider trait for the classification capability.
//!
//! The pipeline only ever talks to `Arc<dyn ClassifyProvider>`. Concrete
//! clients implement it directly; cross-cutting behaviour (throttling,
//! retry) is layered on as decorators implementing the same trait:
//!
//! ```ignore
//! let client: Arc<dyn ClassifyProvider> = Arc::new(GeminiClient::new(key, model));
//! let throttled = Arc::new(ThrottledClassifyProvider::new(client, limiter));
//! let provider = RetryingClassifyProvider::new(throttled, retry_config);
//! ```
//!
//! Wrapping order matters: the throttle sits inside the retry wrapper so
//! every attempt, retries included, consumes quota.

use async_trait::async_trait;

use crate::types::{ClassificationResult, CompanyRecord};
use crate::{CartographeError, Result};

/// Provider able to classify one company.
#[async_trait]
pub trait ClassifyProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Classify a single company.
    ///
    /// Errors carry their [`ErrorClass`](crate::ErrorClass); callers decide
    /// on retries from that, not from the message.
    async fn classify(&self, company: &CompanyRecord) -> Result<ClassificationResult>;

    /// Send the cheapest possible request to check the credential.
    async fn probe(&self) -> Result<()> {
        Err(CartographeError::NotImplemented("probe"))
    }
}
