//! HTTP error types

use courier_resilience::{Classify, FailureKind};

use crate::types::HttpMethodError;

/// Error type for provider HTTP operations
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Transport-level failure (connect refused, reset, DNS, timeout)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Provider answered with a non-success status; body is redacted
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Offline mode with no scripted response for the request
    #[error("no mock registered for {0}")]
    NoMock(String),

    /// Invalid HTTP method
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(#[from] HttpMethodError),
}

impl Classify for HttpError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            HttpError::Network(err) if err.is_timeout() => FailureKind::Timeout,
            HttpError::Network(_) => FailureKind::Network,
            HttpError::Status { status, .. } => FailureKind::HttpStatus(*status),
            HttpError::NoMock(_) | HttpError::InvalidMethod(_) => FailureKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let rate_limited = HttpError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(rate_limited.is_retryable());

        let not_found = HttpError::Status {
            status: 404,
            body: String::new(),
        };
        assert!(!not_found.is_retryable());

        let unavailable = HttpError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_no_mock_fails_closed() {
        assert!(!HttpError::NoMock("GET:http://x".into()).is_retryable());
    }
}
