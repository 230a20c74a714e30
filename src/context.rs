//! Per-attempt request context and the collaborator seams around it.
//!
//! The engine is request-schema-agnostic: everything the surrounding client
//! puts on a request travels in a string-keyed field map, and only the keys
//! the client recognizes (see [`ValidKeys`]) survive a replay. The network
//! transport and the optional instrumentation observer are trait objects the
//! engine consumes but never owns the lifecycle of.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::backoff::BackoffState;
use crate::config::BackoffConfig;
use crate::error::RequestFailure;

/// Request field name under which backoff bounds are carried.
pub const BACKOFF_KEY: &str = "backoff";

/// Request field names the surrounding client recognizes out of the box.
/// Middleware installation extends this set (e.g. with [`BACKOFF_KEY`]).
const DEFAULT_REQUEST_KEYS: &[&str] = &[
    "body",
    "connect_timeout",
    "headers",
    "host",
    "instrumentor",
    "instrumentor_name",
    "method",
    "path",
    "port",
    "query",
    "read_timeout",
    "scheme",
    "write_timeout",
];

/// The set of request field names recognized as valid.
///
/// Built once at wiring time and immutable afterward; the replay strip step
/// reads it on every retry but nothing mutates it past installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidKeys(BTreeSet<String>);

impl Default for ValidKeys {
    fn default() -> Self {
        ValidKeys(DEFAULT_REQUEST_KEYS.iter().map(|k| k.to_string()).collect())
    }
}

impl ValidKeys {
    /// Extend the set with one more recognized key, consuming self.
    /// Adding a key that is already present is a no-op.
    pub fn with_key(mut self, key: &str) -> Self {
        self.0.insert(key.to_string());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Transport handle used to re-issue a request. Re-entering the chain (or
/// not) is the transport's business; the engine never interprets the result.
pub trait Connection: Send + Sync {
    fn resend(&self, ctx: RequestContext);
}

/// Optional observer wrapped around the backoff wait. Implementations must
/// invoke `body` at least once; they may measure around it.
pub trait Instrument: Send + Sync {
    fn instrument(&self, name: &str, ctx: &RequestContext, body: &mut dyn FnMut());
}

/// The full per-attempt record passed through the chain.
pub struct RequestContext {
    /// Schema-agnostic request fields; extraneous keys are allowed on entry
    /// and dropped on replay.
    pub fields: BTreeMap<String, Value>,
    /// Retry bookkeeping for the logical request; created on first entry.
    pub backoff: Option<BackoffState>,
    /// The failure for this attempt (present only on the error path).
    pub error: Option<RequestFailure>,
    /// Transport handle for resubmission.
    pub connection: Option<Arc<dyn Connection>>,
    /// Observer for the scoped wait, when the client carries one.
    pub instrumentor: Option<Arc<dyn Instrument>>,
    /// Scope prefix for the wait span (`"<prefix>.backoff"`).
    pub instrumentor_name: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext {
            fields: BTreeMap::new(),
            backoff: None,
            error: None,
            connection: None,
            instrumentor: None,
            instrumentor_name: None,
        }
    }

    /// Builder-style field insertion, mostly for tests and call sites that
    /// assemble a request by hand.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Caller-supplied partial backoff bounds, when the request carries a
    /// `backoff` field that parses as such. An unparseable value is treated
    /// as absent rather than an error.
    pub fn backoff_overrides(&self) -> Option<BackoffConfig> {
        let value = self.fields.get(BACKOFF_KEY)?;
        match serde_json::from_value(value.clone()) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unparseable backoff field");
                None
            }
        }
    }

    /// Drop every field the client does not recognize, plus the failure for
    /// the spent attempt. The connection handle is expected to have been
    /// taken out by the caller before stripping.
    pub fn retain_recognized(&mut self, valid: &ValidKeys) {
        self.fields.retain(|key, _| valid.contains(key));
        self.error = None;
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("fields", &self.fields)
            .field("backoff", &self.backoff)
            .field("error", &self.error)
            .field("connection", &self.connection.is_some())
            .field("instrumentor", &self.instrumentor.is_some())
            .field("instrumentor_name", &self.instrumentor_name)
            .finish()
    }
}
