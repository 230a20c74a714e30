//! Backoff decision engine.
//!
//! Encapsulates failure classification (throttling vs. transient server
//! error), retry-eligibility policy, exponential delay computation, and the
//! per-request attempt state threaded across retries, composed by the
//! middleware stage in [`middleware`].

mod classify;
mod delay;
mod middleware;
mod policy;
mod state;

pub use classify::{classify, extract_error_code, server_error, Classification, THROTTLING_ERROR_CODES};
pub use delay::{sleep_time, SLEEP_FACTOR};
pub use middleware::{ExponentialBackoff, BACKOFF_SCOPE_SUFFIX, DEFAULT_SCOPE_PREFIX};
pub use policy::{should_retry, RetryLimit};
pub use state::{merge, normalize_error, normalize_request, BackoffState};
