//! Per-request retry bookkeeping, defaulting, and merging.

use std::time::Instant;

use crate::backoff::policy::RetryLimit;
use crate::config::{BackoffConfig, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY};

/// Retry state for one logical request, living across all of its attempts.
///
/// Bounds (`max_retries`, `max_delay`, `min_delay`) are fixed at merge time
/// and never mutated by the engine; `retry_count` only ever grows.
/// `min_delay <= max_delay` is a caller precondition.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffState {
    /// Retry-eligibility bound.
    pub max_retries: RetryLimit,
    /// Upper bound on a single backoff delay, in seconds.
    pub max_delay: f64,
    /// Lower bound on a single backoff delay, in seconds.
    pub min_delay: f64,
    /// Number of replays performed so far for this logical request.
    pub retry_count: u32,
    /// Throttling code extracted from the most recent classified failure.
    pub error_code: Option<String>,
    /// Throttling message extracted alongside `error_code`.
    pub error_message: Option<String>,
    /// When the logical request was first seen; set once, never overwritten.
    pub original_request_start: Option<Instant>,
}

impl Default for BackoffState {
    fn default() -> Self {
        BackoffState {
            max_retries: RetryLimit::default(),
            max_delay: DEFAULT_MAX_DELAY,
            min_delay: DEFAULT_MIN_DELAY,
            retry_count: 0,
            error_code: None,
            error_message: None,
            original_request_start: None,
        }
    }
}

impl BackoffState {
    /// Record one replay decision. Called exactly once per retry, before the
    /// resubmission, so the replayed attempt carries the post-increment count.
    pub fn advance(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }
}

/// Merge configured defaults, the state carried over from the previous
/// attempt, and caller-supplied overrides into a fresh state.
///
/// Explicit override fields win, unset fields fall back to the defaults,
/// built-ins fill whatever remains. `retry_count`, the extracted error
/// fields, and the start timestamp always carry over from `previous`.
///
/// Delay bounds are normalized to finite, non-negative seconds here; TOML
/// and JSON both happily deserialize `inf`/`nan`, and a non-finite bound
/// would poison the sleep duration downstream.
pub fn merge(
    defaults: &BackoffConfig,
    previous: Option<&BackoffState>,
    overrides: Option<&BackoffConfig>,
) -> BackoffState {
    let max_retries = overrides
        .and_then(|c| c.max_retries)
        .or(defaults.max_retries)
        .map(RetryLimit::from_max_retries)
        .unwrap_or_default();
    let max_delay = sane_delay(
        overrides
            .and_then(|c| c.max_delay)
            .or(defaults.max_delay)
            .unwrap_or(DEFAULT_MAX_DELAY),
        DEFAULT_MAX_DELAY,
    );
    let min_delay = sane_delay(
        overrides
            .and_then(|c| c.min_delay)
            .or(defaults.min_delay)
            .unwrap_or(DEFAULT_MIN_DELAY),
        DEFAULT_MIN_DELAY,
    );

    BackoffState {
        max_retries,
        max_delay,
        min_delay,
        retry_count: previous.map(|p| p.retry_count).unwrap_or(0),
        error_code: previous.and_then(|p| p.error_code.clone()),
        error_message: previous.and_then(|p| p.error_message.clone()),
        original_request_start: previous.and_then(|p| p.original_request_start),
    }
}

fn sane_delay(secs: f64, builtin: f64) -> f64 {
    if secs.is_finite() && secs >= 0.0 {
        secs
    } else {
        builtin
    }
}

/// Request-entry normalization: make sure a state exists, clear the
/// extracted error fields for the new attempt, and stamp the start of the
/// logical request if this is the first time it is seen.
pub fn normalize_request(slot: &mut Option<BackoffState>, defaults: &BackoffConfig) {
    let state = slot.get_or_insert_with(|| merge(defaults, None, None));
    state.error_code = None;
    state.error_message = None;
    if state.original_request_start.is_none() {
        state.original_request_start = Some(Instant::now());
    }
}

/// Error-entry normalization: re-merge defaults and overrides around the
/// carried-over state. A request entering the chain for the first time via
/// the error path gets its start stamped here instead.
pub fn normalize_error(
    slot: &mut Option<BackoffState>,
    defaults: &BackoffConfig,
    overrides: Option<&BackoffConfig>,
) {
    let mut merged = merge(defaults, slot.as_ref(), overrides);
    if merged.original_request_start.is_none() {
        merged.original_request_start = Some(Instant::now());
    }
    *slot = Some(merged);
}
