//! Classification providers and the decorators layered on top of them.
//!
//! [`GeminiClient`] is the only concrete provider. [`ThrottledClassifyProvider`]
//! and [`RetryingClassifyProvider`] wrap any [`ClassifyProvider`].

use std::sync::Arc;

pub mod gemini;
pub mod retry;
pub mod throttle;
pub mod traits;

pub use gemini::{GeminiClient, GenerationSettings};
pub use retry::{RetryConfig, RetryingClassifyProvider};
pub use throttle::{BatchPause, QuotaWindow, RateLimiter, ThrottledClassifyProvider};
pub use traits::ClassifyProvider;

/// Wrap `client` as `Retrying(Throttled(client))`.
///
/// The limiter sits inside the retry loop, so every attempt waits for it.
pub fn decorate(
    client: Arc<dyn ClassifyProvider>,
    limiter: Arc<dyn RateLimiter>,
    retry: RetryConfig,
) -> Arc<dyn ClassifyProvider> {
    let throttled = Arc::new(ThrottledClassifyProvider::new(client, limiter));
    Arc::new(RetryingClassifyProvider::new(throttled, retry))
}
