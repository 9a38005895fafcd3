//! Operation event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kinds of committed writes announced on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    NodeCreated,
    NodeUpdated,
    NodeDeleted,
    RelationCreated,
    RelationDeleted,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::NodeCreated => write!(f, "node_created"),
            OperationKind::NodeUpdated => write!(f, "node_updated"),
            OperationKind::NodeDeleted => write!(f, "node_deleted"),
            OperationKind::RelationCreated => write!(f, "relation_created"),
            OperationKind::RelationDeleted => write!(f, "relation_deleted"),
        }
    }
}

/// One committed write operation
///
/// Created by the publisher, handed by reference to each subscriber, then
/// discarded. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEvent {
    /// Commit time
    pub timestamp: DateTime<Utc>,

    /// Monotonic per-bus sequence number
    pub sequence_id: u64,

    /// What kind of write committed
    pub kind: OperationKind,

    /// Caller-provided summary of the committed payload
    pub summary: serde_json::Value,
}
