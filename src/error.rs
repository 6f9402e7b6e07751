//! Cartographe error types

use std::path::PathBuf;
use std::time::Duration;

/// How the retry wrapper treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limits, 5xx responses, dropped connections. Retried with backoff.
    Transient,
    /// The model answered but the answer did not validate. Retried with backoff.
    Parse,
    /// Malformed request, bad credentials, local I/O. Never retried.
    Fatal,
}

/// Cartographe error types
#[derive(Debug, thiserror::Error)]
pub enum CartographeError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("bad request: {0}")]
    BadRequest(String),

    // Model output errors
    #[error("unparseable model output: {0}")]
    Parse(String),

    #[error("empty response from model")]
    EmptyResponse,

    #[error("content filtered: {reason}")]
    ContentFiltered { reason: String },

    // Local data errors
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error on {}: {message}", path.display())]
    Spreadsheet { path: PathBuf, message: String },

    #[error("table {} is missing column '{column}'", path.display())]
    MissingColumn { path: PathBuf, column: String },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no credentials configured")]
    NoCredentials,

    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),
}

impl CartographeError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify the error for the retry wrapper.
    ///
    /// Decided from the variant and HTTP status, never from message text.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http(_) | Self::RateLimited { .. } => ErrorClass::Transient,
            Self::Api { status, .. } if *status >= 500 || *status == 408 => ErrorClass::Transient,
            Self::Parse(_) | Self::EmptyResponse => ErrorClass::Parse,
            _ => ErrorClass::Fatal,
        }
    }

    /// True for transport-level failures worth retrying.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True when the retry wrapper may try again.
    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Fatal
    }

    /// Server-provided delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias for Cartographe operations
pub type Result<T> = std::result::Result<T, CartographeError>;
