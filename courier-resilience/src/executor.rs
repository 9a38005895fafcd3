//! Retry policy and the resilient request executor

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::backoff::BackoffCalculator;
use crate::classify::{classify, Classify, ErrorClass};
use crate::rate_limit::{AdmissionError, KeyedLimiter};
use crate::redact::redact;

/// Retry policy configuration
///
/// One immutable instance per resource kind. Invariants: `initial_delay > 0`
/// and `backoff_multiplier >= 1`; enforced at configuration load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Ceiling on the computed backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Exponential growth factor applied per attempt
    pub backoff_multiplier: f64,

    /// Per-attempt deadline, also bounding time spent queued for admission
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with a constant delay between attempts
    pub fn fixed(max_retries: u32, delay: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            timeout,
        }
    }

    /// Policy that never retries
    pub fn no_retries(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            ..Self::default().with_timeout(timeout)
        }
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Terminal failure of an executed operation
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    /// The retry budget was consumed by retryable failures
    #[error("operation failed after {attempts} attempts over {elapsed_ms}ms: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        elapsed_ms: u64,
        last_error: E,
    },

    /// The retry budget was consumed and the final attempt timed out
    #[error("operation timed out after {attempts} attempts over {elapsed_ms}ms")]
    TimedOut { attempts: u32, elapsed_ms: u64 },

    /// A non-retryable error; no further attempts were made
    #[error("non-retryable error on attempt {attempts}: {error}")]
    Fatal { attempts: u32, error: E },

    /// Admission was denied before the operation could start
    #[error(transparent)]
    Admission(AdmissionError),
}

impl<E> ExecutionError<E> {
    /// The underlying operation error, if one was captured
    pub fn into_inner(self) -> Option<E> {
        match self {
            ExecutionError::RetriesExhausted { last_error, .. } => Some(last_error),
            ExecutionError::Fatal { error, .. } => Some(error),
            ExecutionError::TimedOut { .. } | ExecutionError::Admission(_) => None,
        }
    }

    /// How many attempts ran before the terminal failure
    pub fn attempts(&self) -> u32 {
        match self {
            ExecutionError::RetriesExhausted { attempts, .. }
            | ExecutionError::TimedOut { attempts, .. }
            | ExecutionError::Fatal { attempts, .. } => *attempts,
            ExecutionError::Admission(_) => 0,
        }
    }
}

/// Composes admission control, per-attempt timeouts, classification, and
/// backoff around one fallible asynchronous operation.
///
/// One instance per process, shared via `Arc`; all per-key state lives in
/// the injected [`KeyedLimiter`].
pub struct RequestExecutor {
    limiter: Arc<KeyedLimiter>,
}

impl RequestExecutor {
    /// Create an executor using the given admission controller
    pub fn new(limiter: Arc<KeyedLimiter>) -> Self {
        Self { limiter }
    }

    /// The admission controller backing this executor
    pub fn limiter(&self) -> &Arc<KeyedLimiter> {
        &self.limiter
    }

    /// Run `op` under `key`'s admission limits with retry and backoff
    ///
    /// The operation is re-invoked for each attempt. Failed attempts mutate
    /// no caller-visible state here; operations with side effects must be
    /// naturally idempotent, since a retry re-executes them verbatim.
    pub async fn execute<F, Fut, T, E>(
        &self,
        key: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T, ExecutionError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let calculator = BackoffCalculator::from_policy(policy);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let attempt_started = Instant::now();
            debug!(
                "Attempt {}/{} for '{}' starting",
                attempt + 1,
                policy.max_retries + 1,
                key
            );

            // The permit is held only while the attempt runs, so capacity is
            // free for other callers during the backoff sleep.
            let outcome = {
                let _permit = match self.limiter.acquire(key, policy.timeout).await {
                    Ok(permit) => permit,
                    Err(err) => return Err(ExecutionError::Admission(err)),
                };
                tokio::time::timeout(policy.timeout, op()).await
            };
            let attempt_ms = attempt_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        info!(
                            "'{}' succeeded on attempt {} after {}ms",
                            key,
                            attempt + 1,
                            attempt_ms
                        );
                    } else {
                        debug!("'{}' succeeded in {}ms", key, attempt_ms);
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    if classify(error.failure_kind()) == ErrorClass::Fatal {
                        warn!(
                            "'{}' failed on attempt {} after {}ms with non-retryable error: {}",
                            key,
                            attempt + 1,
                            attempt_ms,
                            redact(&error.to_string())
                        );
                        return Err(ExecutionError::Fatal {
                            attempts: attempt + 1,
                            error,
                        });
                    }
                    warn!(
                        "'{}' attempt {} failed after {}ms: {}",
                        key,
                        attempt + 1,
                        attempt_ms,
                        redact(&error.to_string())
                    );
                    if attempt >= policy.max_retries {
                        return Err(ExecutionError::RetriesExhausted {
                            attempts: attempt + 1,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                            last_error: error,
                        });
                    }
                }
                Err(_) => {
                    warn!(
                        "'{}' attempt {} timed out after {:?}",
                        key,
                        attempt + 1,
                        policy.timeout
                    );
                    if attempt >= policy.max_retries {
                        return Err(ExecutionError::TimedOut {
                            attempts: attempt + 1,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }

            let delay = calculator.delay_for_attempt(attempt);
            debug!("Retrying '{}' in {:?}", key, delay);
            sleep(delay).await;
            attempt += 1;
        }
    }
}
