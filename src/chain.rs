//! Ordered middleware chain and engine installation.
//!
//! Stages are held as an explicit ordered list of named entries so wiring
//! code can position one stage relative to another by name instead of
//! scanning for concrete types. Error dispatch starts at the first stage;
//! each stage receives a [`Next`] handle to hand the failure onward.

use std::fmt;
use std::sync::Arc;

use crate::backoff::ExponentialBackoff;
use crate::config::EbmConfig;
use crate::context::{RequestContext, ValidKeys, BACKOFF_KEY};

/// Conventional name of an instrumentation stage; the backoff engine
/// installs itself immediately before it when present.
pub const INSTRUMENTOR_STAGE: &str = "instrumentor";

/// Name the backoff engine registers under.
pub const BACKOFF_STAGE: &str = "backoff";

/// One stage of the request-processing chain.
///
/// `on_request` runs for every stage in order when a request enters the
/// chain. `on_error` receives the failing context and either consumes it
/// (e.g. by replaying the request) or forwards it via `next`.
pub trait Stage: Send + Sync {
    fn on_request(&self, _ctx: &mut RequestContext) {}
    fn on_error(&self, ctx: RequestContext, next: &dyn Next);
}

/// Handle to the remainder of the chain, used for handoff.
pub trait Next {
    fn on_error(&self, ctx: RequestContext);
}

struct NamedStage {
    name: String,
    stage: Arc<dyn Stage>,
}

/// Explicit ordered list of named stages.
#[derive(Default)]
pub struct Chain {
    stages: Vec<NamedStage>,
}

impl Chain {
    pub fn new() -> Self {
        Chain { stages: Vec::new() }
    }

    /// Append a stage at the end of the chain.
    pub fn append(&mut self, name: &str, stage: Arc<dyn Stage>) {
        self.stages.push(NamedStage {
            name: name.to_string(),
            stage,
        });
    }

    /// Insert a stage immediately before the named anchor. Returns false
    /// (without inserting) when no stage carries that name.
    pub fn insert_before(&mut self, anchor: &str, name: &str, stage: Arc<dyn Stage>) -> bool {
        match self.position(anchor) {
            Some(index) => {
                self.stages.insert(
                    index,
                    NamedStage {
                        name: name.to_string(),
                        stage,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Index of the named stage, when present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Stage names in dispatch order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every stage's request hook in order.
    pub fn on_request(&self, ctx: &mut RequestContext) {
        for named in &self.stages {
            named.stage.on_request(ctx);
        }
    }

    /// Dispatch a failure starting at the first stage.
    pub fn on_error(&self, ctx: RequestContext) {
        self.error_from(0, ctx);
    }

    fn error_from(&self, index: usize, ctx: RequestContext) {
        match self.stages.get(index) {
            Some(named) => named.stage.on_error(ctx, &NextLink { chain: self, index: index + 1 }),
            None => {
                tracing::debug!("failure reached the end of the chain unhandled");
            }
        }
    }
}

struct NextLink<'a> {
    chain: &'a Chain,
    index: usize,
}

impl Next for NextLink<'_> {
    fn on_error(&self, ctx: RequestContext) {
        self.chain.error_from(self.index, ctx);
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Wire the backoff engine into a chain: extend the recognized-field set
/// with the `backoff` key, build the engine around the installed defaults,
/// and insert it before the instrumentation stage when one is present, else
/// at the end. This is the one-time configuration-merge step; nothing
/// mutates the key set afterward.
pub fn install_backoff(chain: &mut Chain, config: &EbmConfig) {
    let valid_keys = ValidKeys::default().with_key(BACKOFF_KEY);
    let mut engine = ExponentialBackoff::new(valid_keys, config.backoff.clone());
    if let Some(prefix) = &config.scope_prefix {
        engine = engine.with_scope_prefix(prefix.clone());
    }
    let engine: Arc<dyn Stage> = Arc::new(engine);

    if !chain.insert_before(INSTRUMENTOR_STAGE, BACKOFF_STAGE, engine.clone()) {
        chain.append(BACKOFF_STAGE, engine);
    }
    tracing::debug!(position = ?chain.position(BACKOFF_STAGE), "backoff middleware installed");
}
