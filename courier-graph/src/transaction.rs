//! Transactional retry wrapper
//!
//! Runs a callback inside a database transaction with the shared retry and
//! backoff discipline. Each attempt walks the full state machine — acquire
//! session, open transaction, run callback, commit or roll back, release
//! session — so a failed attempt can never poison the next one.

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use courier_events::{OperationBus, OperationKind};
use courier_resilience::{classify, BackoffCalculator, Classify, ErrorClass, RetryPolicy};

use crate::backend::{AccessMode, GraphBackend, GraphTransaction};
use crate::error::{GraphError, GraphResult};
use crate::pool::PoolMonitor;

/// Transaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Read,
    Write,
}

impl TxKind {
    fn access_mode(self) -> AccessMode {
        match self {
            TxKind::Read => AccessMode::Read,
            TxKind::Write => AccessMode::Write,
        }
    }

    fn label(self) -> &'static str {
        match self {
            TxKind::Read => "read",
            TxKind::Write => "write",
        }
    }
}

/// Work executed inside one transaction attempt
///
/// The callback may run on several attempts; its statements must be
/// naturally idempotent (upsert-by-id) since retries re-execute them
/// verbatim.
#[async_trait::async_trait]
pub trait TxCallback<T>: Send + Sync {
    async fn execute(&self, tx: &mut dyn GraphTransaction) -> GraphResult<T>;
}

/// Runs read and write transactions with retry, pool accounting, and
/// write-commit event publication.
///
/// One instance per process, built at the composition root from the shared
/// backend, pool monitor, and event bus.
pub struct TransactionRunner {
    backend: Arc<dyn GraphBackend>,
    pool: Arc<PoolMonitor>,
    bus: Arc<OperationBus>,
}

impl TransactionRunner {
    /// Create a runner over the given backend
    pub fn new(backend: Arc<dyn GraphBackend>, pool: Arc<PoolMonitor>, bus: Arc<OperationBus>) -> Self {
        Self { backend, pool, bus }
    }

    /// Run a read transaction; publishes no events
    pub async fn run_read<T, C>(&self, policy: &RetryPolicy, callback: &C) -> GraphResult<T>
    where
        C: TxCallback<T> + ?Sized,
        T: Send,
    {
        self.run_with_retry(TxKind::Read, None, policy, callback).await
    }

    /// Run a write transaction; a commit publishes exactly one event
    pub async fn run_write<T, C>(
        &self,
        operation: OperationKind,
        summary: Value,
        policy: &RetryPolicy,
        callback: &C,
    ) -> GraphResult<T>
    where
        C: TxCallback<T> + ?Sized,
        T: Send,
    {
        self.run_with_retry(TxKind::Write, Some((operation, summary)), policy, callback)
            .await
    }

    async fn run_with_retry<T, C>(
        &self,
        kind: TxKind,
        event: Option<(OperationKind, Value)>,
        policy: &RetryPolicy,
        callback: &C,
    ) -> GraphResult<T>
    where
        C: TxCallback<T> + ?Sized,
        T: Send,
    {
        let calculator = BackoffCalculator::from_policy(policy);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.attempt_once(kind, policy.timeout, callback).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            "{} transaction committed on attempt {}",
                            kind.label(),
                            attempt + 1
                        );
                    }
                    if let Some((operation, summary)) = event {
                        self.bus.publish(operation, summary);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    // Pool exhaustion is a load signal for the caller, not a
                    // reason to retry from inside the wrapper
                    if matches!(error, GraphError::PoolExhausted { .. }) {
                        return Err(error);
                    }
                    if classify(error.failure_kind()) == ErrorClass::Fatal {
                        warn!(
                            "{} transaction failed with non-retryable error: {}",
                            kind.label(),
                            error
                        );
                        return Err(error);
                    }
                    if attempt >= policy.max_retries {
                        return Err(GraphError::RetriesExhausted {
                            attempts: attempt + 1,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                            last_error: Box::new(error),
                        });
                    }

                    let delay = calculator.delay_for_attempt(attempt);
                    warn!(
                        "{} transaction attempt {}/{} failed, retrying in {:?}: {}",
                        kind.label(),
                        attempt + 1,
                        policy.max_retries + 1,
                        delay,
                        error
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One pass through the session/transaction state machine
    ///
    /// The pool permit is dropped on every exit path, so the slot is
    /// returned whether the attempt commits, rolls back, or times out.
    async fn attempt_once<T, C>(
        &self,
        kind: TxKind,
        timeout: Duration,
        callback: &C,
    ) -> GraphResult<T>
    where
        C: TxCallback<T> + ?Sized,
        T: Send,
    {
        let _permit = self.pool.clone().acquire()?;
        let mut session = self.backend.open_session().await?;
        let mut tx = session.begin(kind.access_mode()).await?;

        match tokio::time::timeout(timeout, callback.execute(tx.as_mut())).await {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(error)) => {
                // Roll back before any retry decision; a rollback failure is
                // secondary to the original error
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("rollback after failed attempt also failed: {}", rollback_error);
                }
                Err(error)
            }
            Err(_) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("rollback after timed-out attempt failed: {}", rollback_error);
                }
                Err(GraphError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GraphSession, InMemoryBackend};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Delegating backend that counts opened sessions
    struct CountingBackend {
        inner: InMemoryBackend,
        opened: AtomicU32,
    }

    impl CountingBackend {
        fn new(inner: InMemoryBackend) -> Self {
            Self {
                inner,
                opened: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl GraphBackend for CountingBackend {
        async fn open_session(&self) -> GraphResult<Box<dyn GraphSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.inner.open_session().await
        }
    }

    /// Writes a node, then fails until `fail_until` invocations have passed
    struct FlakyWrite {
        calls: AtomicU32,
        fail_until: u32,
        error: GraphError,
    }

    impl FlakyWrite {
        fn new(fail_until: u32, error: GraphError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_until,
                error,
            }
        }
    }

    #[async_trait]
    impl TxCallback<()> for FlakyWrite {
        async fn execute(&self, tx: &mut dyn GraphTransaction) -> GraphResult<()> {
            tx.run("SET node:alpha", json!({"name": "alpha"})).await?;
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_until {
                return Err(self.error.clone());
            }
            Ok(())
        }
    }

    struct ReadAlpha;

    #[async_trait]
    impl TxCallback<Vec<Value>> for ReadAlpha {
        async fn execute(&self, tx: &mut dyn GraphTransaction) -> GraphResult<Vec<Value>> {
            tx.run("GET node:alpha", json!(null)).await
        }
    }

    struct SlowWrite;

    #[async_trait]
    impl TxCallback<()> for SlowWrite {
        async fn execute(&self, tx: &mut dyn GraphTransaction) -> GraphResult<()> {
            tx.run("SET node:slow", json!(1)).await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            timeout: Duration::from_secs(1),
        }
    }

    fn runner_over(
        backend: Arc<dyn GraphBackend>,
        pool_size: usize,
    ) -> (TransactionRunner, Arc<PoolMonitor>, Arc<OperationBus>) {
        let pool = Arc::new(PoolMonitor::new(pool_size));
        let bus = Arc::new(OperationBus::new());
        let runner = TransactionRunner::new(backend, pool.clone(), bus.clone());
        (runner, pool, bus)
    }

    #[tokio::test]
    async fn test_transient_conflict_retries_with_fresh_sessions() {
        let store = InMemoryBackend::new();
        let backend = Arc::new(CountingBackend::new(store.clone()));
        let (runner, pool, _bus) = runner_over(backend.clone(), 4);

        let callback = FlakyWrite::new(2, GraphError::TransientConflict("deadlock".into()));
        runner
            .run_write(
                OperationKind::NodeCreated,
                json!({"name": "alpha"}),
                &fast_policy(3),
                &callback,
            )
            .await
            .unwrap();

        assert_eq!(callback.calls.load(Ordering::SeqCst), 3);
        // A fresh session per attempt, all released afterwards
        assert_eq!(backend.opened.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats().active, 0);
        assert_eq!(store.get("node:alpha"), Some(json!({"name": "alpha"})));
    }

    #[tokio::test]
    async fn test_failed_attempt_leaves_no_visible_writes() {
        let store = InMemoryBackend::new();
        let backend = Arc::new(CountingBackend::new(store.clone()));
        let (runner, pool, bus) = runner_over(backend, 4);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        bus.subscribe(OperationKind::NodeCreated, move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let callback = FlakyWrite::new(u32::MAX, GraphError::ConstraintViolation("unique".into()));
        let result = runner
            .run_write(
                OperationKind::NodeCreated,
                json!({"name": "alpha"}),
                &fast_policy(5),
                &callback,
            )
            .await;

        // Fatal on the first attempt: no retries, no event, no writes
        assert!(matches!(result, Err(GraphError::ConstraintViolation(_))));
        assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn test_committed_write_publishes_exactly_one_event() {
        let backend = Arc::new(InMemoryBackend::new());
        let (runner, _pool, bus) = runner_over(backend, 4);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        bus.subscribe(OperationKind::NodeCreated, move |event| {
            assert_eq!(event.summary, json!({"name": "alpha"}));
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let callback = FlakyWrite::new(1, GraphError::TransientConflict("lock timeout".into()));
        runner
            .run_write(
                OperationKind::NodeCreated,
                json!({"name": "alpha"}),
                &fast_policy(3),
                &callback,
            )
            .await
            .unwrap();

        // Two attempts ran, but only the commit published
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_publishes_no_event() {
        let store = InMemoryBackend::new();
        let backend = Arc::new(CountingBackend::new(store.clone()));
        let (runner, _pool, bus) = runner_over(backend, 4);

        let seen = Arc::new(AtomicUsize::new(0));
        for kind in [
            OperationKind::NodeCreated,
            OperationKind::NodeUpdated,
            OperationKind::NodeDeleted,
        ] {
            let seen_clone = seen.clone();
            bus.subscribe(kind, move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        let rows = runner.run_read(&fast_policy(1), &ReadAlpha).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_carries_attempt_count() {
        let backend = Arc::new(InMemoryBackend::new());
        let (runner, _pool, _bus) = runner_over(backend, 4);

        let callback = FlakyWrite::new(u32::MAX, GraphError::TransientConflict("deadlock".into()));
        let result = runner
            .run_write(
                OperationKind::NodeCreated,
                json!({}),
                &fast_policy(2),
                &callback,
            )
            .await;

        match result.unwrap_err() {
            GraphError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last_error, GraphError::TransientConflict(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_pool_exhaustion_surfaces_without_retry() {
        let backend = Arc::new(InMemoryBackend::new());
        let (runner, pool, _bus) = runner_over(backend, 1);

        let _held = pool.clone().acquire().unwrap();

        let callback = FlakyWrite::new(0, GraphError::TransientConflict("unused".into()));
        let result = runner
            .run_write(
                OperationKind::NodeCreated,
                json!({}),
                &fast_policy(5),
                &callback,
            )
            .await;

        assert!(matches!(result, Err(GraphError::PoolExhausted { .. })));
        assert_eq!(callback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timed_out_attempts_are_retried_then_surfaced() {
        let store = InMemoryBackend::new();
        let backend = Arc::new(CountingBackend::new(store.clone()));
        let (runner, pool, _bus) = runner_over(backend.clone(), 4);

        let mut policy = fast_policy(1);
        policy.timeout = Duration::from_millis(30);

        let result = runner
            .run_write(OperationKind::NodeCreated, json!({}), &policy, &SlowWrite)
            .await;

        match result.unwrap_err() {
            GraphError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last_error, GraphError::Timeout(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
        // Timed-out attempts rolled back and released their sessions
        assert!(store.is_empty());
        assert_eq!(pool.stats().active, 0);
    }
}
