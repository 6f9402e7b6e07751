//! Static call throttling.
//!
//! Two fixed policies, neither adaptive:
//!
//! - [`BatchPause`]: after every `batch_size` calls, sleep for `pause`
//!   before the next one. Used by the sequential run.
//! - [`QuotaWindow`]: at most `quota` calls per fixed window. A caller that
//!   finds the window full sleeps until it closes. Shared by all workers of
//!   a parallel run.
//!
//! Both count every call they admit, whatever its outcome: a failed request
//! still spends quota on the remote side. [`ThrottledClassifyProvider`]
//! applies a limiter in front of each call; placed inside the retry
//! decorator it also covers retries.
//!
//! All waiting goes through `tokio::time`, so tests can drive the clock
//! with `tokio::time::pause()`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use super::traits::ClassifyProvider;
use crate::Result;
use crate::telemetry;
use crate::types::{ClassificationResult, CompanyRecord};

/// Admission control in front of a remote call.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until one more call may be issued, then count it.
    async fn acquire(&self);
}

// ============================================================================
// BatchPause
// ============================================================================

/// Sleep for a fixed duration after every `batch_size` calls.
pub struct BatchPause {
    batch_size: u32,
    pause: Duration,
    // The lock is held across the pause so concurrent callers queue behind it.
    issued: Mutex<u32>,
}

impl BatchPause {
    pub fn new(batch_size: u32, pause: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pause,
            issued: Mutex::new(0),
        }
    }
}

#[async_trait]
impl RateLimiter for BatchPause {
    async fn acquire(&self) {
        let mut issued = self.issued.lock().await;
        if *issued >= self.batch_size {
            info!(
                calls = *issued,
                pause_secs = self.pause.as_secs_f64(),
                "pausing to respect rate limits"
            );
            metrics::counter!(telemetry::PAUSES_TOTAL, "limiter" => "batch").increment(1);
            tokio::time::sleep(self.pause).await;
            *issued = 0;
        }
        *issued += 1;
    }
}

// ============================================================================
// QuotaWindow
// ============================================================================

struct WindowState {
    opened_at: Instant,
    calls: u32,
}

/// At most `quota` calls per fixed `window`.
pub struct QuotaWindow {
    quota: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl QuotaWindow {
    /// A window of `quota` calls per `window`, opening now.
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            quota: quota.max(1),
            window,
            state: Mutex::new(WindowState {
                opened_at: Instant::now(),
                calls: 0,
            }),
        }
    }

    /// `quota` calls per minute.
    pub fn per_minute(quota: u32) -> Self {
        Self::new(quota, Duration::from_secs(60))
    }
}

#[async_trait]
impl RateLimiter for QuotaWindow {
    async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if now >= state.opened_at + self.window {
            state.opened_at = now;
            state.calls = 0;
        }
        if state.calls >= self.quota {
            let wait = (state.opened_at + self.window).saturating_duration_since(now);
            info!(
                quota = self.quota,
                wait_secs = wait.as_secs_f64(),
                "quota window full, waiting"
            );
            metrics::counter!(telemetry::PAUSES_TOTAL, "limiter" => "quota").increment(1);
            tokio::time::sleep(wait).await;
            state.opened_at = Instant::now();
            state.calls = 0;
        }
        state.calls += 1;
    }
}

// ============================================================================
// ThrottledClassifyProvider
// ============================================================================

/// Decorator that passes every call through a [`RateLimiter`] first.
pub struct ThrottledClassifyProvider {
    inner: Arc<dyn ClassifyProvider>,
    limiter: Arc<dyn RateLimiter>,
}

impl ThrottledClassifyProvider {
    pub fn new(inner: Arc<dyn ClassifyProvider>, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl ClassifyProvider for ThrottledClassifyProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn classify(&self, company: &CompanyRecord) -> Result<ClassificationResult> {
        self.limiter.acquire().await;
        self.inner.classify(company).await
    }

    async fn probe(&self) -> Result<()> {
        self.inner.probe().await
    }
}
