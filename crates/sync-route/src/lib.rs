//! Routing and batching engine for mesh-sync.
//!
//! Consumes captured change rows from an ordered change log (produced
//! externally by database triggers), decides per row which target nodes
//! should receive it via pluggable [`Router`]s, and accumulates rows
//! into per-(node, channel) outgoing batches with transaction-aware
//! completion boundaries.
//!
//! The correctness property carried by this crate: rows belonging to
//! one source transaction are never split so that one half commits in a
//! batch without the rest following. Only rows detected as
//! transaction-final by the bounded look-ahead [`TransactionWindow`] may
//! close a batch.

pub mod change;
pub mod engine;
pub mod router;
pub mod testing;
pub mod window;

pub use change::{ChangeLog, ChangeRow};
pub use engine::{
    BatchAlgorithm, BatchIdAllocator, BatchSink, ChannelConfig, OutgoingBatch, RoutingEngine,
    RoutingLock, RoutingResult,
};
pub use router::{ColumnMatchRouter, DefaultRouter, RouteDecision, Router, RoutingContext};
pub use window::TransactionWindow;
