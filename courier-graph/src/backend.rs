//! Graph backend abstractions
//!
//! Object-safe traits decoupling the transaction runner from any concrete
//! driver, plus an in-memory backend whose transactions buffer writes and
//! apply them atomically on commit. A real driver adapter implements the
//! same three traits.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A source of database sessions
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Open a fresh session
    async fn open_session(&self) -> GraphResult<Box<dyn GraphSession>>;
}

/// One database session; owned exclusively by a single transaction attempt
#[async_trait]
pub trait GraphSession: Send + Sync {
    /// Begin a transaction on this session
    async fn begin(&mut self, mode: AccessMode) -> GraphResult<Box<dyn GraphTransaction>>;
}

/// An open transaction
#[async_trait]
pub trait GraphTransaction: Send + Sync {
    /// Run one statement, returning matched values
    async fn run(&mut self, statement: &str, params: Value) -> GraphResult<Vec<Value>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> GraphResult<()>;

    /// Roll back the transaction, discarding buffered writes
    async fn rollback(self: Box<Self>) -> GraphResult<()>;
}

/// In-memory graph backend
///
/// Statements are `SET <key>` (params is the stored value), `GET <key>`,
/// and `DELETE <key>`. Writes stay buffered in the transaction until commit,
/// so a rolled-back transaction leaves no trace.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a committed value directly, bypassing any transaction
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.read().get(key).cloned()
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Whether the store has no committed entries
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

#[async_trait]
impl GraphBackend for InMemoryBackend {
    async fn open_session(&self) -> GraphResult<Box<dyn GraphSession>> {
        Ok(Box::new(InMemorySession {
            store: self.store.clone(),
        }))
    }
}

struct InMemorySession {
    store: Arc<RwLock<HashMap<String, Value>>>,
}

#[async_trait]
impl GraphSession for InMemorySession {
    async fn begin(&mut self, mode: AccessMode) -> GraphResult<Box<dyn GraphTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.store.clone(),
            mode,
            pending: Vec::new(),
        }))
    }
}

enum PendingOp {
    Set(String, Value),
    Delete(String),
}

struct InMemoryTransaction {
    store: Arc<RwLock<HashMap<String, Value>>>,
    mode: AccessMode,
    pending: Vec<PendingOp>,
}

impl InMemoryTransaction {
    fn check_writable(&self) -> GraphResult<()> {
        if self.mode == AccessMode::Read {
            return Err(GraphError::QueryFailed(
                "write statement in a read transaction".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a key against buffered writes first, then the committed store
    fn read_through(&self, key: &str) -> Option<Value> {
        for op in self.pending.iter().rev() {
            match op {
                PendingOp::Set(k, v) if k == key => return Some(v.clone()),
                PendingOp::Delete(k) if k == key => return None,
                _ => {}
            }
        }
        self.store.read().get(key).cloned()
    }
}

#[async_trait]
impl GraphTransaction for InMemoryTransaction {
    async fn run(&mut self, statement: &str, params: Value) -> GraphResult<Vec<Value>> {
        let (verb, key) = statement
            .split_once(' ')
            .ok_or_else(|| GraphError::SyntaxError(format!("incomplete statement: {}", statement)))?;

        match verb {
            "GET" => Ok(self.read_through(key).into_iter().collect()),
            "SET" => {
                self.check_writable()?;
                self.pending.push(PendingOp::Set(key.to_string(), params));
                Ok(Vec::new())
            }
            "DELETE" => {
                self.check_writable()?;
                self.pending.push(PendingOp::Delete(key.to_string()));
                Ok(Vec::new())
            }
            other => Err(GraphError::SyntaxError(format!("unknown verb: {}", other))),
        }
    }

    async fn commit(self: Box<Self>) -> GraphResult<()> {
        let mut store = self.store.write();
        for op in self.pending {
            match op {
                PendingOp::Set(key, value) => {
                    store.insert(key, value);
                }
                PendingOp::Delete(key) => {
                    store.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> GraphResult<()> {
        // Buffered writes are simply dropped
        Ok(())
    }
}
