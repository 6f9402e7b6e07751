//! Telemetry metric name constants.
//!
//! Centralised metric names for cartographe operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `cartographe_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).

/// Total remote calls issued, retries included.
///
/// Labels: `model`, `status` ("ok" | "error").
pub const CALLS_TOTAL: &str = "cartographe_calls_total";

/// Remote call duration in seconds.
///
/// Labels: `model`.
pub const CALL_DURATION_SECONDS: &str = "cartographe_call_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`, `class` ("transient" | "parse").
pub const RETRIES_TOTAL: &str = "cartographe_retries_total";

/// Total throttle pauses.
///
/// Labels: `limiter` ("batch" | "quota").
pub const PAUSES_TOTAL: &str = "cartographe_pauses_total";

/// Total companies brought to a terminal outcome.
///
/// Labels: `outcome` ("accepted" | "rejected" | "failed").
pub const COMPANIES_TOTAL: &str = "cartographe_companies_total";
