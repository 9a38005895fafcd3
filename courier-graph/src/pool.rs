//! Session pool accounting and early-warning signals
//!
//! The monitor owns counters only, never sessions. Every acquire is paired
//! with exactly one release through [`SessionPermit`]'s drop, so error paths
//! and cancellation cannot leak a slot.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{GraphError, GraphResult};

const HIGH_UTILIZATION: f64 = 0.8;
const LEAK_SUSPECT: f64 = 0.95;

/// Point-in-time pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions currently checked out
    pub active: usize,

    /// Sessions checked out since process start
    pub total_created: u64,

    /// Configured pool ceiling
    pub max: usize,
}

impl PoolStats {
    /// Fraction of the pool in use
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.active as f64 / self.max as f64
        }
    }
}

/// Tracks session checkouts against a configured ceiling
pub struct PoolMonitor {
    max: usize,
    active: AtomicUsize,
    total_created: AtomicU64,
    high_warned: AtomicBool,
    leak_warned: AtomicBool,
}

impl PoolMonitor {
    /// Create a monitor for a pool of `max` sessions
    pub fn new(max: usize) -> Self {
        Self {
            max,
            active: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            high_warned: AtomicBool::new(false),
            leak_warned: AtomicBool::new(false),
        }
    }

    /// Check out one session slot
    ///
    /// Fails with [`GraphError::PoolExhausted`] when the pool is at its
    /// ceiling; the caller decides whether to shed or resubmit.
    pub fn acquire(self: Arc<Self>) -> GraphResult<SessionPermit> {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current >= self.max {
                return Err(GraphError::PoolExhausted {
                    active: current,
                    max: self.max,
                });
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.total_created.fetch_add(1, Ordering::SeqCst);

        let active = current + 1;
        let utilization = active as f64 / self.max as f64;
        if utilization >= LEAK_SUSPECT {
            if !self.leak_warned.swap(true, Ordering::SeqCst) {
                warn!(
                    "session pool near exhaustion: {}/{} in use; sessions may be leaking",
                    active, self.max
                );
            }
        } else if utilization > HIGH_UTILIZATION && !self.high_warned.swap(true, Ordering::SeqCst) {
            warn!("session pool utilization high: {}/{} in use", active, self.max);
        }

        Ok(SessionPermit {
            monitor: self,
            released: AtomicBool::new(false),
        })
    }

    fn release(&self) {
        let previous = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "release without matching acquire");

        let utilization = (previous.saturating_sub(1)) as f64 / self.max.max(1) as f64;
        if utilization <= HIGH_UTILIZATION {
            self.high_warned.store(false, Ordering::SeqCst);
            self.leak_warned.store(false, Ordering::SeqCst);
        }
    }

    /// Current usage counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.load(Ordering::SeqCst),
            total_created: self.total_created.load(Ordering::SeqCst),
            max: self.max,
        }
    }

    /// Start a periodic task logging utilization while the pool is busy
    ///
    /// Idle pools stay silent. The task is aborted when the handle drops.
    pub fn spawn_sampler(self: Arc<Self>, interval: Duration) -> SamplerHandle {
        let monitor = self;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = monitor.stats();
                if stats.active > 0 {
                    info!(
                        "session pool: {}/{} active, {} created total",
                        stats.active, stats.max, stats.total_created
                    );
                }
            }
        });
        SamplerHandle { handle }
    }
}

/// Ownership of one pool slot; the slot is returned exactly once on drop
pub struct SessionPermit {
    monitor: Arc<PoolMonitor>,
    released: AtomicBool,
}

impl SessionPermit {
    /// Return the slot explicitly; equivalent to dropping the permit
    pub fn release(self) {}
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        // Guard keeps a manual release followed by drop from double-counting
        if !self.released.swap(true, Ordering::SeqCst) {
            self.monitor.release();
        }
    }
}

/// Aborts the sampling task on drop
pub struct SamplerHandle {
    handle: JoinHandle<()>,
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
