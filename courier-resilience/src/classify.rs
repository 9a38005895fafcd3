//! Retryable-vs-fatal error classification
//!
//! Callers map their concrete errors onto [`FailureKind`] and the executor
//! consults [`classify`] to decide whether another attempt is worthwhile.
//! The classifier is a pure function over the kind enumeration; it never
//! inspects error payloads.

use serde::{Deserialize, Serialize};

/// The failure modes the execution layer distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// HTTP response with a non-success status code
    HttpStatus(u16),

    /// Network-level failure (connection reset, DNS failure, connect refused)
    Network,

    /// The attempt exceeded its deadline
    Timeout,

    /// Transient database conflict (deadlock, lock timeout, leader switch)
    GraphTransient,

    /// Database constraint or integrity violation
    GraphConstraint,

    /// Malformed query rejected by the database
    GraphSyntax,

    /// Anything the caller could not map onto a known failure mode
    Unknown,
}

/// Outcome of classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt, budget permitting
    Retryable,
    /// Surface immediately; retrying cannot help
    Fatal,
}

/// Classify a failure kind
///
/// Unknown kinds are fatal: an unrecognized failure must never be retried
/// indefinitely.
pub fn classify(kind: FailureKind) -> ErrorClass {
    match kind {
        FailureKind::HttpStatus(429) => ErrorClass::Retryable,
        FailureKind::HttpStatus(status) if status >= 500 => ErrorClass::Retryable,
        FailureKind::HttpStatus(_) => ErrorClass::Fatal,
        FailureKind::Network => ErrorClass::Retryable,
        FailureKind::Timeout => ErrorClass::Retryable,
        FailureKind::GraphTransient => ErrorClass::Retryable,
        FailureKind::GraphConstraint => ErrorClass::Fatal,
        FailureKind::GraphSyntax => ErrorClass::Fatal,
        FailureKind::Unknown => ErrorClass::Fatal,
    }
}

/// Trait for errors that can report their failure kind
pub trait Classify {
    /// The failure mode this error represents
    fn failure_kind(&self) -> FailureKind;

    /// Whether this error is worth retrying
    fn is_retryable(&self) -> bool {
        classify(self.failure_kind()) == ErrorClass::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_is_retryable() {
        assert_eq!(classify(FailureKind::HttpStatus(429)), ErrorClass::Retryable);
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert_eq!(classify(FailureKind::HttpStatus(500)), ErrorClass::Retryable);
        assert_eq!(classify(FailureKind::HttpStatus(502)), ErrorClass::Retryable);
        assert_eq!(classify(FailureKind::HttpStatus(503)), ErrorClass::Retryable);
    }

    #[test]
    fn test_client_errors_are_fatal() {
        assert_eq!(classify(FailureKind::HttpStatus(400)), ErrorClass::Fatal);
        assert_eq!(classify(FailureKind::HttpStatus(404)), ErrorClass::Fatal);
        assert_eq!(classify(FailureKind::HttpStatus(422)), ErrorClass::Fatal);
    }

    #[test]
    fn test_network_and_timeout_are_retryable() {
        assert_eq!(classify(FailureKind::Network), ErrorClass::Retryable);
        assert_eq!(classify(FailureKind::Timeout), ErrorClass::Retryable);
    }

    #[test]
    fn test_graph_classification() {
        assert_eq!(classify(FailureKind::GraphTransient), ErrorClass::Retryable);
        assert_eq!(classify(FailureKind::GraphConstraint), ErrorClass::Fatal);
        assert_eq!(classify(FailureKind::GraphSyntax), ErrorClass::Fatal);
    }

    #[test]
    fn test_unknown_fails_closed() {
        assert_eq!(classify(FailureKind::Unknown), ErrorClass::Fatal);
    }
}
