//! Core value objects for the mesh-sync replication framework.
//!
//! This crate provides the foundational types shared by every other
//! mesh-sync crate:
//!
//! - [`Table`] / [`Column`] - passive schema metadata for one relational table
//! - [`RowEvent`] - one captured row-level change (the unit of change)
//! - [`Batch`] - one atomic unit of transfer between two nodes
//! - [`BatchStats`] / [`BatchAck`] - per-batch accounting and acknowledgment
//! - [`BinaryEncoding`] - text encodings for binary column values on the wire
//!
//! # Architecture
//!
//! sync-model sits at the foundation of the workspace:
//!
//! ```text
//! sync-model (this crate)
//!    │
//!    ├─── sync-protocol   (reads/writes these types on the wire)
//!    ├─── sync-transform  (rewrites RowEvents between table shapes)
//!    ├─── sync-load       (replays RowEvents against a target database)
//!    └─── sync-route      (buckets change rows into outgoing batches)
//! ```
//!
//! Everything here is a plain value object: no I/O, no database handles.
//! A [`RowEvent`] is meaningless without its owning [`Table`] (column
//! order, since row values are positional) and its owning [`Batch`]
//! (channel and binary encoding), so the three travel together through
//! the pipeline.

pub mod batch;
pub mod event;
pub mod table;

// Re-exports for convenience
pub use batch::{Batch, BatchAck, BatchStats, BinaryEncoding};
pub use event::{EventType, RowEvent};
pub use table::{Column, ColumnTypeCode, PlatformColumn, Table};

use thiserror::Error;

/// Errors produced while constructing or interrogating model objects.
#[derive(Debug, Error)]
pub enum ModelError {
    /// An event-type token that is not part of the closed variant set.
    #[error("unknown event type token: {0}")]
    UnknownEventType(String),

    /// A binary-encoding name that is not part of the closed variant set.
    #[error("unknown binary encoding: {0}")]
    UnknownEncoding(String),

    /// A binary cell that could not be decoded under the declared encoding.
    #[error("invalid {encoding} data in column value: {reason}")]
    InvalidBinary { encoding: String, reason: String },
}
