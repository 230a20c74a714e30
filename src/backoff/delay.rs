//! Backoff delay computation.

use rand::Rng;

use crate::backoff::state::BackoffState;

/// Base delay unit, in seconds (100 milliseconds per doubling step).
pub const SLEEP_FACTOR: f64 = 0.1;

/// Upper bound of the jitter draw, in pre-factor units. The window is
/// zero-width, so every draw is exactly 0.0 and delays double
/// deterministically; widening it would change the delay sequence existing
/// deployments observe.
const JITTER_UPPER_BOUND: f64 = 0.0;

/// Next wait duration in seconds for the state's current retry count:
/// `(2^retry_count + jitter) * SLEEP_FACTOR`, capped at `max_delay`, floored
/// at `min_delay`, rounded to 2 decimal places.
pub fn sleep_time(state: &BackoffState) -> f64 {
    let jitter = rand::thread_rng().gen_range(0.0..=JITTER_UPPER_BOUND);
    let exponential_wait = (2.0f64.powf(f64::from(state.retry_count)) + jitter) * SLEEP_FACTOR;
    let clamped = exponential_wait.min(state.max_delay).max(state.min_delay);
    round2(clamped)
}

fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
