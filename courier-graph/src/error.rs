//! Graph layer error types

use courier_resilience::{Classify, FailureKind};
use std::time::Duration;
use thiserror::Error;

/// Result type for graph operations
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Graph-related errors
#[derive(Debug, Error, Clone)]
pub enum GraphError {
    /// Could not reach the database
    #[error("graph connection failed: {0}")]
    ConnectionFailed(String),

    /// Statement execution failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Conflict expected to resolve on retry (deadlock, lock timeout, leader switch)
    #[error("transient conflict: {0}")]
    TransientConflict(String),

    /// Data-integrity violation; retrying cannot help
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Malformed statement rejected by the database
    #[error("query syntax error: {0}")]
    SyntaxError(String),

    /// The attempt exceeded its deadline
    #[error("transaction timed out after {0:?}")]
    Timeout(Duration),

    /// Commit or rollback failure
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// No session available; caller decides whether to resubmit
    #[error("session pool exhausted: {active} of {max} sessions in use")]
    PoolExhausted { active: usize, max: usize },

    /// Terminal failure after the retry budget was consumed
    #[error("transaction failed after {attempts} attempts over {elapsed_ms}ms: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        elapsed_ms: u64,
        last_error: Box<GraphError>,
    },
}

impl Classify for GraphError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            GraphError::ConnectionFailed(_) => FailureKind::Network,
            GraphError::TransientConflict(_) => FailureKind::GraphTransient,
            GraphError::ConstraintViolation(_) => FailureKind::GraphConstraint,
            GraphError::SyntaxError(_) => FailureKind::GraphSyntax,
            GraphError::Timeout(_) => FailureKind::Timeout,
            // Everything else fails closed
            GraphError::QueryFailed(_)
            | GraphError::TransactionFailed(_)
            | GraphError::PoolExhausted { .. }
            | GraphError::RetriesExhausted { .. } => FailureKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(GraphError::TransientConflict("deadlock".into()).is_retryable());
        assert!(GraphError::ConnectionFailed("refused".into()).is_retryable());
        assert!(GraphError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_data_errors_are_fatal() {
        assert!(!GraphError::ConstraintViolation("unique".into()).is_retryable());
        assert!(!GraphError::SyntaxError("bad query".into()).is_retryable());
    }

    #[test]
    fn test_unclassified_errors_fail_closed() {
        assert!(!GraphError::QueryFailed("odd".into()).is_retryable());
        assert!(!GraphError::PoolExhausted { active: 8, max: 8 }.is_retryable());
    }
}
