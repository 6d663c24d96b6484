//! Database writer with conflict resolution for mesh-sync.
//!
//! This crate replays a stream of row-change events against a live
//! target database:
//!
//! - [`Platform`] / [`DbTransaction`] - the pluggable vendor capability
//!   (DML building, execution, error classification)
//! - [`ColumnMapper`] - cached source-to-target positional column mapping
//! - [`DatabaseWriter`] - applies one [`sync_model::RowEvent`] per call,
//!   routing primary-key violations and missing rows into conflict
//!   resolution
//! - [`ConflictSetting`] / conflict resolution - per-table/per-channel
//!   policies {Manual, Fallback, NewerWins, Ignore}
//! - [`IncomingBatchStore`] - committed-batch bookkeeping for idempotent
//!   replay
//!
//! Conflicts are values, not exceptions: the writer returns
//! [`LoadResult`] and the caller pattern-matches. Propagated errors are
//! reserved for database failures with no configured recovery.

pub mod batch_store;
pub mod conflict;
pub mod mapping;
pub mod platform;
pub mod testing;
pub mod writer;

pub use batch_store::IncomingBatchStore;
pub use conflict::{
    ConflictSetting, ConflictSettings, DetectionMethod, Granularity, ResolutionPolicy,
};
pub use mapping::ColumnMapper;
pub use platform::{DbTransaction, DmlStatement, DmlType, Platform, SqlError, SqlErrorKind};
pub use writer::{DatabaseWriter, ScriptEventHandler};

use sync_model::{EventType, RowEvent};

/// Why a DML attempt was routed into conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// INSERT hit a primary-key/unique violation
    PkViolation,
    /// UPDATE or DELETE affected zero rows
    MissingRow,
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStatus::PkViolation => f.write_str("primary key violation"),
            LoadStatus::MissingRow => f.write_str("missing row"),
        }
    }
}

/// A conflict surfaced to the caller: the intended change, where it was
/// aimed, and what the database said.
#[derive(Debug, Clone)]
pub struct ConflictEvent {
    /// Qualified target table name
    pub table: String,
    /// The event that could not be applied
    pub event: RowEvent,
    /// The originally-intended event type
    pub original_type: EventType,
    /// The detected condition
    pub status: LoadStatus,
    /// Operator-facing detail
    pub message: String,
}

/// Outcome of applying one row event.
#[derive(Debug, Clone)]
pub enum LoadResult {
    /// The event (or its configured fallback) was applied.
    Applied,
    /// Conflict resolution requires an operator; nothing further was
    /// attempted for this event.
    Conflict(Box<ConflictEvent>),
    /// The event was deliberately not applied (ignore policy, losing
    /// side of newer-wins, script event without an engine).
    Skipped,
}

impl LoadResult {
    /// True when the event finished without operator attention.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, LoadResult::Conflict(_))
    }
}
