//! Cartographe - resumable Gen-AI startup classifier
//!
//! This crate sends company records to a Gemini model, validates the
//! structured classification it returns, and appends the companies that
//! qualify as Gen-AI startups to an output table. Runs are resumable:
//! every terminal outcome is written to a checkpoint or error store before
//! the next company is considered.
//!
//! # Run Example
//!
//! ```rust,no_run
//! use cartographe::{Config, Secrets, pipeline};
//!
//! #[tokio::main]
//! async fn main() -> cartographe::Result<()> {
//!     let config = Config::load(None)?;
//!     let keys = Secrets::load()?.require_api_keys()?;
//!
//!     let report = pipeline::run(&config, &keys, false).await?;
//!     println!("{} accepted, {} failed", report.accepted, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! # Custom Providers
//!
//! Anything implementing [`ClassifyProvider`] can be decorated with the
//! same throttle and retry layers and driven by [`pipeline::execute`]:
//!
//! ```rust,ignore
//! let limiter = Arc::new(BatchPause::new(10, Duration::from_secs(60)));
//! let provider = providers::decorate(Arc::new(my_client), limiter, config.retry_config());
//! let report = pipeline::execute(&config, vec![provider]).await?;
//! ```

pub mod config;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod prompt;
pub mod providers;
pub mod reprocess;
pub mod store;
pub mod table;
pub mod telemetry;
pub mod types;
pub mod validation;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use config::{Config, Secrets};
pub use error::{CartographeError, ErrorClass, Result};
pub use pipeline::{Outcome, Recorder, RunReport};
pub use providers::{
    BatchPause, ClassifyProvider, GeminiClient, GenerationSettings, QuotaWindow, RateLimiter,
    RetryConfig, RetryingClassifyProvider, ThrottledClassifyProvider,
};
pub use reprocess::{ReprocessOptions, ReprocessReport};
pub use store::{NameLog, NameSet};
pub use table::{OutputRow, OutputTable};

// Re-export all types
pub use types::{CATEGORIES, ClassificationResult, CompanyRecord, Layer, normalize_name};
