//! The batch data-movement wire protocol.
//!
//! One stream is a sequence of line-oriented records. The first token of
//! each record is a directive keyword; the remaining tokens are
//! CSV-escaped fields:
//!
//! ```text
//! nodeid,store-001
//! binary,BASE64
//! channel,default
//! batch,77
//! schema,crm
//! table,customer
//! keys,id
//! columns,id,name,photo
//! insert,1,alice,
//! old,1,alice,
//! update,1,"alice,a",,1
//! delete,1
//! commit,77
//! ```
//!
//! Reading is pull-based and lazy: [`ProtocolReader`] hands back one
//! logical unit at a time (`next_batch` / `next_table` / `next_event`)
//! and buffers at most one look-ahead record, so a consumer can stop
//! after the table header without materializing the whole batch.
//!
//! Two tolerances are part of the contract:
//!
//! - an unrecognized leading token is logged and skipped, so peers can
//!   extend the wire format without breaking old readers;
//! - a malformed record within a *known* directive fails the batch.
//!
//! Table definitions are cached per stream session by qualified name.
//! A table's `keys`/`columns` records are sent once; later references
//! to the same table reuse the cached definition, and the writer side
//! suppresses re-emitting them. This bandwidth optimization is part of
//! the wire contract, not an implementation detail.
//!
//! Field escaping distinguishes NULL from the empty string: an unquoted
//! empty field is NULL, a quoted empty field (`""`) is the empty string.

pub mod fields;
pub mod reader;
pub mod writer;

pub use reader::ProtocolReader;
pub use writer::ProtocolWriter;

use thiserror::Error;

/// Directive keywords of the wire format.
pub mod tokens {
    pub const NODEID: &str = "nodeid";
    pub const BINARY: &str = "binary";
    pub const CHANNEL: &str = "channel";
    pub const BATCH: &str = "batch";
    pub const CATALOG: &str = "catalog";
    pub const SCHEMA: &str = "schema";
    pub const TABLE: &str = "table";
    pub const KEYS: &str = "keys";
    pub const COLUMNS: &str = "columns";
    pub const INSERT: &str = "insert";
    pub const OLD: &str = "old";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const SQL: &str = "sql";
    pub const BSH: &str = "bsh";
    pub const CREATE: &str = "create";
    pub const COMMIT: &str = "commit";
}

/// Errors produced while reading or writing the wire format.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error on protocol stream")]
    Io(#[from] std::io::Error),

    /// A record within a known directive that cannot be parsed.
    #[error("malformed {directive} record at line {line}: {reason}")]
    Malformed {
        directive: String,
        line: u64,
        reason: String,
    },

    /// A row record whose positional field count does not line up with
    /// the current table definition.
    #[error("{directive} record at line {line} has {actual} fields, expected {expected}")]
    FieldCount {
        directive: String,
        line: u64,
        expected: usize,
        actual: usize,
    },

    /// A row record arrived before any table definition.
    #[error("row record at line {line} without a preceding table directive")]
    MissingTableContext { line: u64 },

    /// A quoted field never closed before end of stream.
    #[error("unterminated quoted field starting at line {line}")]
    UnterminatedQuote { line: u64 },
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
