//! Retry-eligibility policy.

use crate::backoff::state::BackoffState;

/// Retry-count bound for one logical request.
///
/// The integer wire form (`max_retries` on the `backoff` request key) maps
/// `0` to `Unlimited` for compatibility with existing configurations, so an
/// unset or zero bound retries forever on a persistently failing request.
/// `Disabled` is reachable only through this typed API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryLimit {
    /// No bound; every retryable failure is eligible.
    #[default]
    Unlimited,
    /// Eligible while fewer than this many retries have been used.
    Bounded(u32),
    /// Never eligible.
    Disabled,
}

impl RetryLimit {
    /// Map the integer wire form: `0` is unlimited, anything else bounded.
    pub fn from_max_retries(max_retries: u32) -> Self {
        if max_retries == 0 {
            RetryLimit::Unlimited
        } else {
            RetryLimit::Bounded(max_retries)
        }
    }

    /// Whether another retry is permitted at the given used-retry count.
    pub fn permits(self, retry_count: u32) -> bool {
        match self {
            RetryLimit::Unlimited => true,
            RetryLimit::Bounded(max) => retry_count < max,
            RetryLimit::Disabled => false,
        }
    }
}

/// Whether the state's bound permits another retry.
pub fn should_retry(state: &BackoffState) -> bool {
    state.max_retries.permits(state.retry_count)
}
