//! Per-resource-key admission control
//!
//! Bounds both instantaneous concurrency (fair semaphore, FIFO) and
//! throughput over a rolling window (token bucket with continuous refill).
//! State is keyed by resource name, created lazily on first use, and kept
//! for the lifetime of the process.

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission limits for one resource key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum operations executing simultaneously
    pub max_concurrent: usize,

    /// Maximum operations started within any rolling window
    pub capacity_per_window: u32,

    /// Window duration for the throughput quota
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            capacity_per_window: 120,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new(max_concurrent: usize, capacity_per_window: u32, window: Duration) -> Self {
        Self {
            max_concurrent,
            capacity_per_window,
            window,
        }
    }

    /// Quota expressed per minute
    pub fn per_minute(max_concurrent: usize, capacity: u32) -> Self {
        Self::new(max_concurrent, capacity, Duration::from_secs(60))
    }

    /// Quota expressed per second
    pub fn per_second(max_concurrent: usize, capacity: u32) -> Self {
        Self::new(max_concurrent, capacity, Duration::from_secs(1))
    }
}

/// Admission failures
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The caller's deadline elapsed while still queued; the operation never started
    #[error("admission deadline of {waited:?} exceeded while queued for resource '{key}'")]
    DeadlineExceeded { key: String, waited: Duration },

    /// The limiter for this key was shut down
    #[error("rate limiter for resource '{key}' is closed")]
    Closed { key: String },
}

/// Continuous-refill token bucket
///
/// Refills at `capacity / window` tokens per second rather than resetting at
/// window boundaries, so a burst straddling a boundary cannot exceed the
/// quota.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or report how long until one is available
    fn try_take(&mut self, config: &RateLimitConfig) -> Result<(), Duration> {
        let rate = config.capacity_per_window as f64 / config.window.as_secs_f64();
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(config.capacity_per_window as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / rate))
        }
    }
}

/// Per-key limiter state, cached for process lifetime
struct KeyState {
    config: RateLimitConfig,
    concurrency: Arc<Semaphore>,
    bucket: Mutex<TokenBucket>,
    // Serializes token waits so queued callers drain in submission order
    refill_gate: tokio::sync::Mutex<()>,
    in_flight: AtomicUsize,
    queue_depth: AtomicUsize,
}

impl KeyState {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(config.max_concurrent)),
            bucket: Mutex::new(TokenBucket::new(config.capacity_per_window)),
            refill_gate: tokio::sync::Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            queue_depth: AtomicUsize::new(0),
            config,
        }
    }
}

/// Holds admission for one in-flight operation; dropping it releases capacity
pub struct AdmissionPermit {
    state: Arc<KeyState>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrements queue depth when a waiter leaves the queue, admitted or not
struct QueueGuard<'a>(&'a KeyState);

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.queue_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Observable limiter state for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSnapshot {
    /// Operations currently executing
    pub in_flight: usize,

    /// Callers waiting for admission
    pub queue_depth: usize,
}

/// Admission control across all resource keys
///
/// One instance per process, constructed at the composition root and shared
/// via `Arc`.
pub struct KeyedLimiter {
    default_config: RateLimitConfig,
    overrides: HashMap<String, RateLimitConfig>,
    states: Mutex<HashMap<String, Arc<KeyState>>>,
}

impl KeyedLimiter {
    /// Create a limiter applying the same limits to every key
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self::with_limits(default_config, HashMap::new())
    }

    /// Create a limiter with per-key limit overrides
    pub fn with_limits(
        default_config: RateLimitConfig,
        overrides: HashMap<String, RateLimitConfig>,
    ) -> Self {
        Self {
            default_config,
            overrides,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn state_for(&self, key: &str) -> Arc<KeyState> {
        let mut states = self.states.lock();
        states
            .entry(key.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                debug!(
                    "Creating limiter state for '{}': max_concurrent={}, {} per {:?}",
                    key, config.max_concurrent, config.capacity_per_window, config.window
                );
                Arc::new(KeyState::new(config))
            })
            .clone()
    }

    /// Wait for admission for `key`, giving up after `deadline`
    ///
    /// Queued callers are served in submission order. A caller whose deadline
    /// elapses while queued is abandoned and its operation never starts.
    pub async fn acquire(
        &self,
        key: &str,
        deadline: Duration,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let state = self.state_for(key);

        state.queue_depth.fetch_add(1, Ordering::SeqCst);
        let queued = QueueGuard(&state);
        let admitted = tokio::time::timeout(deadline, Self::admit(&state)).await;
        drop(queued);

        match admitted {
            Ok(Ok(permit)) => {
                state.in_flight.fetch_add(1, Ordering::SeqCst);
                Ok(AdmissionPermit {
                    state: state.clone(),
                    _permit: permit,
                })
            }
            Ok(Err(_)) => Err(AdmissionError::Closed {
                key: key.to_string(),
            }),
            Err(_) => {
                debug!("Admission deadline of {:?} exceeded for '{}'", deadline, key);
                Err(AdmissionError::DeadlineExceeded {
                    key: key.to_string(),
                    waited: deadline,
                })
            }
        }
    }

    async fn admit(state: &KeyState) -> Result<OwnedSemaphorePermit, tokio::sync::AcquireError> {
        // Fair semaphore: waiters are admitted FIFO
        let permit = state.concurrency.clone().acquire_owned().await?;

        let gate = state.refill_gate.lock().await;
        loop {
            let wait = {
                let mut bucket = state.bucket.lock();
                match bucket.try_take(&state.config) {
                    Ok(()) => None,
                    Err(wait) => Some(wait),
                }
            };
            match wait {
                None => break,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
        drop(gate);

        Ok(permit)
    }

    /// Run `op` under admission for `key`
    ///
    /// Resolves or rejects exactly once; the permit is held for the duration
    /// of the operation.
    pub async fn schedule<F, Fut, T>(
        &self,
        key: &str,
        deadline: Duration,
        op: F,
    ) -> Result<T, AdmissionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire(key, deadline).await?;
        Ok(op().await)
    }

    /// Current in-flight and queue counts for a key
    pub fn snapshot(&self, key: &str) -> LimiterSnapshot {
        let states = self.states.lock();
        match states.get(key) {
            Some(state) => LimiterSnapshot {
                in_flight: state.in_flight.load(Ordering::SeqCst),
                queue_depth: state.queue_depth.load(Ordering::SeqCst),
            },
            None => LimiterSnapshot {
                in_flight: 0,
                queue_depth: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn wide_open(max_concurrent: usize) -> RateLimitConfig {
        RateLimitConfig::new(max_concurrent, 10_000, Duration::from_secs(1))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound_and_queue_depth() {
        let limiter = Arc::new(KeyedLimiter::new(wide_open(40)));

        let mut handles = Vec::new();
        for _ in 0..45 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire("grok", Duration::from_secs(5)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(150)).await;
            }));
        }

        // Give all tasks time to reach the limiter
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = limiter.snapshot("grok");
        assert_eq!(snapshot.in_flight, 40);
        assert_eq!(snapshot.queue_depth, 5);

        for handle in handles {
            handle.await.unwrap();
        }
        let snapshot = limiter.snapshot("grok");
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.queue_depth, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_callers_served_in_submission_order() {
        let limiter = Arc::new(KeyedLimiter::new(wide_open(1)));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire("seq", Duration::from_secs(5)).await.unwrap();
                order.lock().push(i);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }));
            // Stagger submissions so queue order is deterministic
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_window_quota_delays_excess_admissions() {
        let config = RateLimitConfig::new(10, 2, Duration::from_millis(200));
        let limiter = KeyedLimiter::new(config);

        let started = Instant::now();
        for _ in 0..3 {
            let permit = limiter.acquire("quota", Duration::from_secs(5)).await.unwrap();
            drop(permit);
        }
        // Third admission must wait for one token to refill (~100ms)
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_deadline_while_queued_never_starts() {
        let limiter = KeyedLimiter::new(wide_open(1));
        let ran = Arc::new(AtomicBool::new(false));

        let _held = limiter.acquire("busy", Duration::from_secs(1)).await.unwrap();

        let ran_clone = ran.clone();
        let result = limiter
            .schedule("busy", Duration::from_millis(50), || async move {
                ran_clone.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(
            result,
            Err(AdmissionError::DeadlineExceeded { .. })
        ));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(limiter.snapshot("busy").queue_depth, 0);
    }

    #[tokio::test]
    async fn test_per_key_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("openai".to_string(), wide_open(1));
        let limiter = KeyedLimiter::with_limits(wide_open(8), overrides);

        let _held = limiter.acquire("openai", Duration::from_secs(1)).await.unwrap();
        // Second admission on the overridden key is blocked
        let result = limiter.acquire("openai", Duration::from_millis(30)).await;
        assert!(matches!(
            result,
            Err(AdmissionError::DeadlineExceeded { .. })
        ));

        // Other keys still use the default limits
        let _other = limiter.acquire("grok", Duration::from_millis(30)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_permit_releases_capacity() {
        let limiter = KeyedLimiter::new(wide_open(1));

        let permit = limiter.acquire("k", Duration::from_millis(50)).await.unwrap();
        drop(permit);
        let _again = limiter.acquire("k", Duration::from_millis(50)).await.unwrap();
        assert_eq!(limiter.snapshot("k").in_flight, 1);
    }

    #[test]
    fn test_bucket_refills_continuously() {
        let config = RateLimitConfig::new(1, 10, Duration::from_secs(1));
        let mut bucket = TokenBucket::new(10);

        for _ in 0..10 {
            assert!(bucket.try_take(&config).is_ok());
        }
        let wait = bucket.try_take(&config).unwrap_err();
        // One token refills in 100ms at 10 tokens/sec
        assert!(wait <= Duration::from_millis(100));
    }

    #[test]
    fn test_config_helpers() {
        let per_minute = RateLimitConfig::per_minute(4, 60);
        assert_eq!(per_minute.capacity_per_window, 60);
        assert_eq!(per_minute.window, Duration::from_secs(60));

        let per_second = RateLimitConfig::per_second(4, 10);
        assert_eq!(per_second.window, Duration::from_secs(1));
    }
}
