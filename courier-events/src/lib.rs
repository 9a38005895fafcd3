//! Operation event bus for Courier
//!
//! Fire-and-forget publication of committed write operations, decoupling
//! the data-access layer from observability counters and audit consumers.
//! Delivery is synchronous, in-process, and best-effort: at most once, no
//! persistence, no replay.

pub mod bus;
pub mod event;

pub use bus::{OperationBus, SubscriptionToken};
pub use event::{OperationEvent, OperationKind};
