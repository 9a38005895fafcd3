//! Observer registry with isolated handler invocation

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::event::{OperationEvent, OperationKind};

type Handler = Arc<dyn Fn(&OperationEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: Handler,
}

/// Proof of subscription; pass back to [`OperationBus::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    kind: OperationKind,
    id: u64,
}

/// Synchronous in-process event bus
///
/// One instance per process, constructed at the composition root. Handler
/// failures are isolated: a panicking subscriber is logged and skipped, the
/// remaining subscribers still run, and the publisher is never affected.
pub struct OperationBus {
    subscribers: Mutex<HashMap<OperationKind, Vec<Subscriber>>>,
    next_subscriber_id: AtomicU64,
    sequence: AtomicU64,
}

impl OperationBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register `handler` for events of `kind`
    pub fn subscribe<F>(&self, kind: OperationKind, handler: F) -> SubscriptionToken
    where
        F: Fn(&OperationEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let mut subscribers = self.subscribers.lock();
        subscribers.entry(kind).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        debug!(kind = %kind, subscriber = id, "subscriber registered");
        SubscriptionToken { kind, id }
    }

    /// Remove the subscription behind `token`
    ///
    /// Returns false if the token was already unsubscribed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(&token.kind) {
            let before = list.len();
            list.retain(|s| s.id != token.id);
            return list.len() < before;
        }
        false
    }

    /// Publish one committed write
    ///
    /// Returns the event's sequence id. With no subscribers this is a no-op
    /// apart from consuming a sequence number.
    pub fn publish(&self, kind: OperationKind, summary: serde_json::Value) -> u64 {
        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = OperationEvent {
            timestamp: Utc::now(),
            sequence_id,
            kind,
            summary,
        };

        // Snapshot under the lock, invoke outside it, so a handler that
        // subscribes or unsubscribes cannot deadlock the bus.
        let handlers: Vec<Handler> = {
            let subscribers = self.subscribers.lock();
            subscribers
                .get(&kind)
                .map(|list| list.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!(kind = %kind, sequence_id, "no subscribers for event");
            return sequence_id;
        }

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(kind = %kind, sequence_id, "event handler panicked; skipping");
            }
        }
        debug!(
            kind = %kind,
            sequence_id,
            subscribers = handlers.len(),
            "event delivered"
        );
        sequence_id
    }

    /// Number of handlers registered for `kind`
    pub fn subscriber_count(&self, kind: OperationKind) -> usize {
        let subscribers = self.subscribers.lock();
        subscribers.get(&kind).map(Vec::len).unwrap_or(0)
    }
}

impl Default for OperationBus {
    fn default() -> Self {
        Self::new()
    }
}
