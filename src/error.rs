//! Request failure type the backoff engine classifies.

/// Failure produced by one request attempt (HTTP error status or a
/// socket-level fault before a response was read). Kept as a small typed
/// enum so classification can inspect the status and body without parsing
/// the whole response.
#[derive(Debug, thiserror::Error)]
pub enum RequestFailure {
    /// Server responded with a non-success HTTP status.
    #[error("HTTP {status}")]
    Http {
        /// Response status code (e.g. 400, 503).
        status: u16,
        /// Raw response body; may be empty or arbitrary bytes-as-text.
        body: String,
    },
    /// Socket-level failure (connection reset, refused, DNS, timeout).
    #[error("socket: {0}")]
    Socket(#[from] std::io::Error),
}

impl RequestFailure {
    /// Build an HTTP-status failure with no body.
    pub fn status(status: u16) -> Self {
        RequestFailure::Http {
            status,
            body: String::new(),
        }
    }

    /// Build an HTTP-status failure carrying a response body.
    pub fn status_with_body(status: u16, body: impl Into<String>) -> Self {
        RequestFailure::Http {
            status,
            body: body.into(),
        }
    }

    /// Status code, when this failure came from an HTTP response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RequestFailure::Http { status, .. } => Some(*status),
            RequestFailure::Socket(_) => None,
        }
    }

    /// Response body, when this failure came from an HTTP response.
    pub fn body(&self) -> Option<&str> {
        match self {
            RequestFailure::Http { body, .. } => Some(body),
            RequestFailure::Socket(_) => None,
        }
    }
}
