//! Classify request failures into throttling, server error, or neither.

use std::sync::OnceLock;

use regex::Regex;

use crate::backoff::state::BackoffState;
use crate::error::RequestFailure;

/// Error codes that identify a rate-limit rejection.
pub const THROTTLING_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "RequestThrottled",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
];

/// HTTP statuses treated as transient server errors (501 deliberately not).
const SERVER_ERROR_STATUSES: &[u16] = &[500, 502, 503, 504];

static BODY_PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();

/// Error-body patterns, tried in order; the first match wins. Each captures
/// a code and, when the body carries one, a message.
fn body_patterns() -> &'static [Regex; 3] {
    BODY_PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?is)<Code>([^<]+)</Code>(?:.*?<Message>([^<]*)</Message>)?").unwrap(),
            Regex::new(r"(?is)<Exception>([^<]+)</Exception>(?:.*?<Message>([^<]*)</Message>)?")
                .unwrap(),
            Regex::new(r#"(?is)"__type"\s*:\s*"([^"]+)"(?:\s*,\s*"message"\s*:\s*"([^"]*)")?"#)
                .unwrap(),
        ]
    })
}

/// Classification of a failed attempt. At most one applies; throttling is
/// checked first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Rate-limit rejection identified via response body and code set.
    Throttling {
        code: String,
        message: Option<String>,
    },
    /// Transient server-side or socket-level failure.
    ServerError,
}

/// Extract an error code (and message, when present) from a response body.
/// Total over arbitrary input: an unmatched or malformed body yields `None`.
pub fn extract_error_code(body: &str) -> Option<(String, Option<String>)> {
    for pattern in body_patterns() {
        if let Some(caps) = pattern.captures(body) {
            let code = caps.get(1)?.as_str().trim().to_string();
            let message = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|m| !m.is_empty());
            return Some((code, message));
        }
    }
    None
}

/// Throttling check: a client-rejected request (HTTP 400) whose body yields
/// a code from [`THROTTLING_ERROR_CODES`].
fn throttle(failure: &RequestFailure) -> Option<(String, Option<String>)> {
    if failure.http_status() != Some(400) {
        return None;
    }
    let (code, message) = extract_error_code(failure.body()?)?;
    if THROTTLING_ERROR_CODES.contains(&code.as_str()) {
        Some((code, message))
    } else {
        None
    }
}

/// Server-error check: transient 5xx statuses or any socket-level failure,
/// independent of body content.
pub fn server_error(failure: &RequestFailure) -> bool {
    match failure {
        RequestFailure::Http { status, .. } => SERVER_ERROR_STATUSES.contains(status),
        RequestFailure::Socket(_) => true,
    }
}

/// Classify a failure, recording extracted throttling code/message into the
/// state so callers can inspect them after a terminal failure.
pub fn classify(failure: &RequestFailure, state: &mut BackoffState) -> Option<Classification> {
    if let Some((code, message)) = throttle(failure) {
        tracing::debug!(code = %code, "throttling response detected");
        state.error_code = Some(code.clone());
        state.error_message = message.clone();
        return Some(Classification::Throttling { code, message });
    }
    if server_error(failure) {
        tracing::debug!(failure = %failure, "transient server error detected");
        return Some(Classification::ServerError);
    }
    None
}
