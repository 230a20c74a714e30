//! The backoff orchestrator: a chain stage that retries or hands off.

use std::thread;
use std::time::Duration;

use crate::backoff::{classify, delay, policy, state};
use crate::chain::{Next, Stage};
use crate::config::BackoffConfig;
use crate::context::{RequestContext, ValidKeys};

/// Suffix appended to the scope prefix for the wait span.
pub const BACKOFF_SCOPE_SUFFIX: &str = ".backoff";

/// Scope prefix used when neither the request nor the configuration names one.
pub const DEFAULT_SCOPE_PREFIX: &str = "ebm";

/// Middleware stage that intercepts failed attempts and either replays the
/// request after an exponential delay or forwards the failure down the chain.
///
/// Each instance carries the recognized-field set and default bounds fixed
/// at installation; per-request `backoff` fields override the bounds but can
/// never reset the retry count.
#[derive(Debug)]
pub struct ExponentialBackoff {
    valid_keys: ValidKeys,
    defaults: BackoffConfig,
    scope_prefix: Option<String>,
}

impl ExponentialBackoff {
    pub fn new(valid_keys: ValidKeys, defaults: BackoffConfig) -> Self {
        ExponentialBackoff {
            valid_keys,
            defaults,
            scope_prefix: None,
        }
    }

    /// Configuration-level scope prefix, used when a request carries an
    /// instrumentor but no name of its own.
    pub fn with_scope_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.scope_prefix = Some(prefix.into());
        self
    }

    /// Retry path: wait, advance the count, strip the context down to the
    /// fields the client recognizes, and resubmit via the transport.
    fn backoff(&self, mut ctx: RequestContext) {
        let wait_secs = ctx.backoff.as_ref().map(delay::sleep_time).unwrap_or(0.0);
        self.scoped_sleep(wait_secs, &ctx);

        if let Some(state) = ctx.backoff.as_mut() {
            state.advance();
        }
        let retry_count = ctx.backoff.as_ref().map(|s| s.retry_count).unwrap_or(0);

        let connection = ctx.connection.take();
        ctx.retain_recognized(&self.valid_keys);

        tracing::debug!(retry_count, wait_secs, "resubmitting request");
        if let Some(connection) = connection {
            connection.resend(ctx);
        }
    }

    /// Blocking wait, wrapped in the observer's span when one is present.
    /// The observer contract is to invoke the body at least once.
    fn scoped_sleep(&self, wait_secs: f64, ctx: &RequestContext) {
        let duration = Duration::from_secs_f64(wait_secs.max(0.0));
        match ctx.instrumentor.clone() {
            Some(instrumentor) => {
                let prefix = ctx
                    .instrumentor_name
                    .as_deref()
                    .or(self.scope_prefix.as_deref())
                    .unwrap_or(DEFAULT_SCOPE_PREFIX);
                let name = format!("{}{}", prefix, BACKOFF_SCOPE_SUFFIX);
                let mut body = || thread::sleep(duration);
                instrumentor.instrument(&name, ctx, &mut body);
            }
            None => thread::sleep(duration),
        }
    }
}

impl Stage for ExponentialBackoff {
    fn on_request(&self, ctx: &mut RequestContext) {
        state::normalize_request(&mut ctx.backoff, &self.defaults);
    }

    fn on_error(&self, mut ctx: RequestContext, next: &dyn Next) {
        let overrides = ctx.backoff_overrides();
        state::normalize_error(&mut ctx.backoff, &self.defaults, overrides.as_ref());

        let classification = match (ctx.error.as_ref(), ctx.backoff.as_mut()) {
            (Some(failure), Some(state)) => classify::classify(failure, state),
            _ => None,
        };
        let eligible = classification.is_some()
            && ctx.backoff.as_ref().map(policy::should_retry).unwrap_or(false);

        if eligible {
            if ctx.connection.is_none() {
                tracing::warn!("retry-eligible failure carries no connection handle; handing off");
                next.on_error(ctx);
                return;
            }
            self.backoff(ctx);
        } else {
            tracing::debug!(
                classified = classification.is_some(),
                "failure not retried; handing off"
            );
            next.on_error(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestFailure;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn throttling_failure() -> RequestFailure {
        RequestFailure::status_with_body(
            400,
            "<Code>Throttling</Code><Message>Rate exceeded</Message>",
        )
    }

    fn engine() -> ExponentialBackoff {
        ExponentialBackoff::new(
            ValidKeys::default().with_key(crate::context::BACKOFF_KEY),
            BackoffConfig::default(),
        )
    }

    #[derive(Default)]
    struct RecordingNext {
        received: Mutex<Vec<RequestContext>>,
    }

    impl Next for RecordingNext {
        fn on_error(&self, ctx: RequestContext) {
            self.received.lock().unwrap().push(ctx);
        }
    }

    #[derive(Default)]
    struct RecordingConnection {
        resent: Mutex<Vec<RequestContext>>,
    }

    impl crate::context::Connection for RecordingConnection {
        fn resend(&self, ctx: RequestContext) {
            self.resent.lock().unwrap().push(ctx);
        }
    }

    struct RecordingInstrument {
        names: Mutex<Vec<String>>,
        body_calls: Mutex<u32>,
    }

    impl crate::context::Instrument for RecordingInstrument {
        fn instrument(&self, name: &str, _ctx: &RequestContext, body: &mut dyn FnMut()) {
            self.names.lock().unwrap().push(name.to_string());
            body();
            *self.body_calls.lock().unwrap() += 1;
        }
    }

    #[test]
    fn unclassified_failure_hands_off_once_with_error_intact() {
        let next = RecordingNext::default();
        let mut ctx = RequestContext::new();
        ctx.error = Some(RequestFailure::status(400));

        engine().on_error(ctx, &next);

        let received = next.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert!(received[0].error.is_some());
        assert_eq!(received[0].backoff.as_ref().unwrap().retry_count, 0);
    }

    #[test]
    fn exhausted_retries_hand_off_with_last_throttle_code_kept() {
        let next = RecordingNext::default();
        let connection = Arc::new(RecordingConnection::default());
        let mut ctx = RequestContext::new()
            .with_field(crate::context::BACKOFF_KEY, json!({"max_retries": 1}));
        ctx.connection = Some(connection);
        ctx.error = Some(throttling_failure());
        let mut state = crate::backoff::BackoffState::default();
        state.retry_count = 1;
        ctx.backoff = Some(state);

        engine().on_error(ctx, &next);

        let received = next.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let state = received[0].backoff.as_ref().unwrap();
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.error_code.as_deref(), Some("Throttling"));
        assert_eq!(state.error_message.as_deref(), Some("Rate exceeded"));
    }

    #[test]
    fn throttled_failure_is_replayed_with_advanced_count() {
        let next = RecordingNext::default();
        let connection = Arc::new(RecordingConnection::default());
        let mut ctx = RequestContext::new()
            .with_field("method", json!("GET"))
            .with_field("ignored_stuff", json!("foo"))
            .with_field(crate::context::BACKOFF_KEY, json!({"max_delay": 0.0}));
        ctx.connection = Some(connection.clone());
        ctx.error = Some(throttling_failure());

        engine().on_error(ctx, &next);

        assert!(next.received.lock().unwrap().is_empty());
        let resent = connection.resent.lock().unwrap();
        assert_eq!(resent.len(), 1);
        let replay = &resent[0];
        assert_eq!(replay.backoff.as_ref().unwrap().retry_count, 1);
        assert!(replay.error.is_none());
        assert!(replay.connection.is_none());
        assert!(replay.fields.contains_key("method"));
        assert!(replay.fields.contains_key(crate::context::BACKOFF_KEY));
        assert!(!replay.fields.contains_key("ignored_stuff"));
    }

    #[test]
    fn server_error_is_replayed() {
        let next = RecordingNext::default();
        let connection = Arc::new(RecordingConnection::default());
        let mut ctx = RequestContext::new()
            .with_field(crate::context::BACKOFF_KEY, json!({"max_delay": 0.0}));
        ctx.connection = Some(connection.clone());
        ctx.error = Some(RequestFailure::status(503));

        engine().on_error(ctx, &next);

        assert_eq!(connection.resent.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_connection_degrades_to_handoff() {
        let next = RecordingNext::default();
        let mut ctx = RequestContext::new()
            .with_field(crate::context::BACKOFF_KEY, json!({"max_delay": 0.0}));
        ctx.error = Some(throttling_failure());

        engine().on_error(ctx, &next);

        assert_eq!(next.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn wait_runs_inside_the_named_scope() {
        let instrument = Arc::new(RecordingInstrument {
            names: Mutex::new(Vec::new()),
            body_calls: Mutex::new(0),
        });
        let mut ctx = RequestContext::new();
        ctx.instrumentor = Some(instrument.clone());
        ctx.instrumentor_name = Some("test".to_string());

        engine().scoped_sleep(0.0, &ctx);

        assert_eq!(
            instrument.names.lock().unwrap().as_slice(),
            ["test.backoff"]
        );
        assert_eq!(*instrument.body_calls.lock().unwrap(), 1);
    }

    #[test]
    fn scope_prefix_falls_back_to_config_then_default() {
        let instrument = Arc::new(RecordingInstrument {
            names: Mutex::new(Vec::new()),
            body_calls: Mutex::new(0),
        });
        let mut ctx = RequestContext::new();
        ctx.instrumentor = Some(instrument.clone());

        engine().scoped_sleep(0.0, &ctx);
        engine().with_scope_prefix("svc").scoped_sleep(0.0, &ctx);

        assert_eq!(
            instrument.names.lock().unwrap().as_slice(),
            ["ebm.backoff", "svc.backoff"]
        );
    }

    #[test]
    fn uninstrumented_wait_still_runs() {
        let ctx = RequestContext::new();
        // Just exercises the plain-sleep arm with a zero wait.
        engine().scoped_sleep(0.0, &ctx);
    }

    #[test]
    fn on_request_normalizes_state() {
        let mut ctx = RequestContext::new();
        engine().on_request(&mut ctx);
        let state = ctx.backoff.as_ref().unwrap();
        assert_eq!(state.retry_count, 0);
        assert!(state.original_request_start.is_some());
    }
}
