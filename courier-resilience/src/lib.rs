//! Resilience primitives for Courier
//!
//! This crate provides the execution discipline applied to every call that
//! leaves the process: retry policies with exponential backoff and jitter,
//! retryable-vs-fatal error classification, and per-resource-key admission
//! control (bounded concurrency plus a rolling-window quota).

pub mod backoff;
pub mod classify;
pub mod executor;
pub mod rate_limit;
pub mod redact;

// Re-export commonly used types
pub use backoff::BackoffCalculator;
pub use classify::{classify, Classify, ErrorClass, FailureKind};
pub use executor::{ExecutionError, RequestExecutor, RetryPolicy};
pub use rate_limit::{AdmissionError, AdmissionPermit, KeyedLimiter, LimiterSnapshot, RateLimitConfig};
pub use redact::redact;
