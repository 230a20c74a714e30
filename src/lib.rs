//! EBM: exponential backoff retry middleware for HTTP request chains.
//!
//! Sits between a client's error-handling hook and its transport: classifies
//! a failed attempt (throttling, transient server error, or terminal),
//! decides retry eligibility, waits an exponentially growing delay, and
//! replays the request with only recognized fields preserved, or hands the
//! failure to the next stage in the chain.

pub mod config;
pub mod logging;

pub mod backoff;
pub mod chain;
pub mod context;
pub mod error;

pub use backoff::{BackoffState, Classification, ExponentialBackoff, RetryLimit};
pub use chain::{install_backoff, Chain, Next, Stage};
pub use config::{BackoffConfig, EbmConfig};
pub use context::{Connection, Instrument, RequestContext, ValidKeys};
pub use error::RequestFailure;
