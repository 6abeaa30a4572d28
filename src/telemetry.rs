//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `decision` — admission outcome: "allowed" or "denied"
//! - `cache` — cache instance: "response" or "voice"
//! - `status` — terminal task status or delivery outcome

/// Total admission-control decisions.
///
/// Labels: `decision` ("allowed" | "denied").
pub const ADMISSION_TOTAL: &str = "muninn_admission_total";

/// Total cache hits.
///
/// Labels: `cache` ("response" | "voice").
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total cache misses.
///
/// Labels: `cache` ("response" | "voice").
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total tasks reaching a terminal state.
///
/// Labels: `status` ("completed" | "failed" | "cancelled").
pub const TASKS_TOTAL: &str = "muninn_tasks_total";

/// Wall-clock task duration (creation to completion) in seconds.
///
/// Recorded only for completed tasks.
pub const TASK_DURATION_SECONDS: &str = "muninn_task_duration_seconds";

/// Total per-endpoint webhook delivery outcomes.
///
/// Labels: `status` ("ok" | "error").
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "muninn_webhook_deliveries_total";

/// Total webhook retry attempts (not counting the initial attempt).
pub const WEBHOOK_RETRIES_TOTAL: &str = "muninn_webhook_retries_total";
