//! Sliding-window admission control.
//!
//! [`RateLimiter`] decides whether a new unit of work may start, based on
//! the number of requests an identity has made within a trailing window.
//! Denial is a boolean signal, not an error — the caller decides the
//! user-facing behaviour (e.g. "try again later").
//!
//! Windows are pruned lazily on each check; a low-frequency sweep inside
//! [`RateLimiter::is_allowed()`] drops identities with no recent activity
//! so the map cannot grow unboundedly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::telemetry;
use crate::{MuninnError, Result};

/// How often the limiter sweeps stale identity entries from its map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Configuration for the sliding-window rate limiter.
///
/// ```rust
/// # use muninn::RateLimiterConfig;
/// # use std::time::Duration;
/// let config = RateLimiterConfig::new()
///     .max_requests(30)
///     .window(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum permitted requests per identity per window. Default: 30.
    pub max_requests: u32,
    /// Trailing window duration. Default: 60s.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum permitted requests per window.
    pub fn max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the trailing window duration.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Validate field ranges, returning one message per violation.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_requests == 0 {
            errors.push("max_requests must be at least 1".to_string());
        }
        if self.window.is_zero() {
            errors.push("window must be greater than zero".to_string());
        }
        errors
    }
}

/// Per-identity sliding-window rate limiter.
///
/// Tracks the timestamps of permitted calls per identity. A call is
/// permitted while fewer than `max_requests` permitted calls fall inside
/// the trailing window; a denied call does not mutate the window.
///
/// All operations appear atomic per identity. Unknown identities start
/// with an empty window and are permitted up to the limit.
pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl RateLimiter {
    /// Create a rate limiter, validating the configuration.
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(MuninnError::Configuration(errors.join("; ")));
        }
        Ok(Self {
            config,
            windows: Mutex::new((HashMap::new(), Instant::now())),
        })
    }

    /// Whether a timestamp still falls inside the window ending at `now`.
    fn in_window(&self, ts: Instant, now: Instant) -> bool {
        match now.checked_sub(self.config.window) {
            Some(cutoff) => ts > cutoff,
            // Process younger than the window: everything is in-window.
            None => true,
        }
    }

    /// Check whether `identity` may start a new unit of work.
    ///
    /// Permits and records the call if the identity has made fewer than
    /// `max_requests` permitted calls within the window; denies without
    /// mutating state otherwise. Never fails.
    pub fn is_allowed(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.windows.lock();
        let (windows, last_sweep) = &mut *guard;

        // Periodic sweep: drop identities with no in-window requests.
        if last_sweep.elapsed() >= SWEEP_INTERVAL {
            windows.retain(|_, timestamps| {
                timestamps.retain(|ts| {
                    match now.checked_sub(self.config.window) {
                        Some(cutoff) => *ts > cutoff,
                        None => true,
                    }
                });
                !timestamps.is_empty()
            });
            *last_sweep = now;
        }

        let entry = windows.entry(identity.to_owned()).or_default();
        entry.retain(|ts| self.in_window(*ts, now));

        if entry.len() >= self.config.max_requests as usize {
            metrics::counter!(telemetry::ADMISSION_TOTAL, "decision" => "denied").increment(1);
            return false;
        }

        entry.push(now);
        metrics::counter!(telemetry::ADMISSION_TOTAL, "decision" => "allowed").increment(1);
        true
    }

    /// How many more calls `identity` may make in the current window.
    ///
    /// Read-only: does not prune or record anything.
    pub fn remaining(&self, identity: &str) -> u32 {
        let now = Instant::now();
        let guard = self.windows.lock();
        let in_window = guard
            .0
            .get(identity)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|ts| self.in_window(**ts, now))
                    .count()
            })
            .unwrap_or(0);
        self.config
            .max_requests
            .saturating_sub(u32::try_from(in_window).unwrap_or(u32::MAX))
    }

    /// Forget all recorded requests for one identity.
    pub fn reset(&self, identity: &str) {
        self.windows.lock().0.remove(identity);
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.windows.lock().0.len()
    }
}
