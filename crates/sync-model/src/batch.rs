//! Batches, per-batch statistics, and acknowledgments.
//!
//! A [`Batch`] is the unit of transfer: one atomic, ordered group of row
//! events moved between two nodes under one numeric id. Batch ids are
//! assigned monotonically per source node; a batch id at or below the
//! highest already-committed id for its source node must be detected and
//! skipped on replay (idempotent reload), never reapplied.

use crate::ModelError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Text encoding for binary column values on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BinaryEncoding {
    /// Values are passed through untouched
    #[default]
    None,
    /// Values are base64 text
    Base64,
    /// Values are lowercase hex text
    Hex,
}

impl BinaryEncoding {
    /// The wire keyword for this encoding.
    pub fn as_token(&self) -> &'static str {
        match self {
            BinaryEncoding::None => "NONE",
            BinaryEncoding::Base64 => "BASE64",
            BinaryEncoding::Hex => "HEX",
        }
    }

    /// Parse a wire keyword.
    pub fn from_token(token: &str) -> Result<Self, ModelError> {
        match token.to_ascii_uppercase().as_str() {
            "NONE" => Ok(BinaryEncoding::None),
            "BASE64" => Ok(BinaryEncoding::Base64),
            "HEX" => Ok(BinaryEncoding::Hex),
            other => Err(ModelError::UnknownEncoding(other.to_string())),
        }
    }

    /// Encode raw bytes into their wire text form.
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            BinaryEncoding::None => String::from_utf8_lossy(bytes).into_owned(),
            BinaryEncoding::Base64 => BASE64.encode(bytes),
            BinaryEncoding::Hex => hex::encode(bytes),
        }
    }

    /// Decode a wire text cell back into raw bytes.
    pub fn decode(&self, text: &str) -> Result<Vec<u8>, ModelError> {
        match self {
            BinaryEncoding::None => Ok(text.as_bytes().to_vec()),
            BinaryEncoding::Base64 => BASE64.decode(text).map_err(|e| ModelError::InvalidBinary {
                encoding: "base64".to_string(),
                reason: e.to_string(),
            }),
            BinaryEncoding::Hex => hex::decode(text).map_err(|e| ModelError::InvalidBinary {
                encoding: "hex".to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for BinaryEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Running per-batch accounting.
///
/// Statistics are created per batch-processing call, accumulated locally
/// by whichever component is doing the work, and merged by the caller.
/// They are instrumentation: byte counts come from raw record lengths
/// and have no bearing on protocol correctness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Raw bytes read or written for this batch
    pub byte_count: u64,
    /// DML statements executed
    pub statement_count: u64,
    /// Rows inserted
    pub insert_count: u64,
    /// Rows updated
    pub update_count: u64,
    /// Rows deleted
    pub delete_count: u64,
    /// Opaque SQL events executed
    pub sql_count: u64,
    /// DDL payload events executed
    pub create_count: u64,
    /// Script events executed
    pub script_count: u64,
    /// Failed inserts recovered as updates
    pub fallback_update_count: u64,
    /// Failed updates recovered as inserts
    pub fallback_insert_count: u64,
    /// Deletes of already-missing rows that were ignored
    pub missing_delete_count: u64,
    /// Rows skipped by conflict policy or configuration
    pub ignore_count: u64,
    /// Milliseconds spent on network transfer
    pub network_millis: u64,
    /// Milliseconds spent in transform/filter stages
    pub filter_millis: u64,
    /// Milliseconds spent applying DML
    pub load_millis: u64,
}

impl BatchStats {
    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &BatchStats) {
        self.byte_count += other.byte_count;
        self.statement_count += other.statement_count;
        self.insert_count += other.insert_count;
        self.update_count += other.update_count;
        self.delete_count += other.delete_count;
        self.sql_count += other.sql_count;
        self.create_count += other.create_count;
        self.script_count += other.script_count;
        self.fallback_update_count += other.fallback_update_count;
        self.fallback_insert_count += other.fallback_insert_count;
        self.missing_delete_count += other.missing_delete_count;
        self.ignore_count += other.ignore_count;
        self.network_millis += other.network_millis;
        self.filter_millis += other.filter_millis;
        self.load_millis += other.load_millis;
    }

    /// Count one row event of the given type.
    pub fn count_event(&mut self, event_type: crate::EventType) {
        use crate::EventType::*;
        match event_type {
            Insert => self.insert_count += 1,
            Update => self.update_count += 1,
            Delete => self.delete_count += 1,
            Sql => self.sql_count += 1,
            Create => self.create_count += 1,
            Script => self.script_count += 1,
        }
    }

    /// Total row events of all types.
    pub fn row_count(&self) -> u64 {
        self.insert_count
            + self.update_count
            + self.delete_count
            + self.sql_count
            + self.create_count
            + self.script_count
    }
}

/// One atomic unit of transfer between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Monotonic id assigned by the source node
    pub batch_id: i64,
    /// Delivery lane this batch belongs to
    pub channel_id: String,
    /// Node that produced the batch
    pub source_node_id: String,
    /// Encoding for binary column values within this batch
    pub binary_encoding: BinaryEncoding,
    /// Running accounting for this batch
    pub stats: BatchStats,
}

impl Batch {
    /// Create a batch with empty statistics.
    pub fn new(
        batch_id: i64,
        channel_id: impl Into<String>,
        source_node_id: impl Into<String>,
    ) -> Self {
        Self {
            batch_id,
            channel_id: channel_id.into(),
            source_node_id: source_node_id.into(),
            binary_encoding: BinaryEncoding::default(),
            stats: BatchStats::default(),
        }
    }

    /// Set the binary encoding (builder style).
    pub fn with_encoding(mut self, encoding: BinaryEncoding) -> Self {
        self.binary_encoding = encoding;
        self
    }
}

/// Error detail carried by a failed acknowledgment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AckError {
    /// 1-based ordinal of the failing row, counted only among rows that
    /// parsed successfully before the failure
    pub failed_row_number: Option<u64>,
    /// Vendor SQL error code, when the failure was a database error
    pub sql_code: Option<i32>,
    /// SQLSTATE, when the failure was a database error
    pub sql_state: Option<String>,
    /// Human-readable failure description
    pub message: String,
}

/// Acknowledgment for one processed batch, returned to the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAck {
    /// Batch the ack refers to
    pub batch_id: i64,
    /// Node sending the ack
    pub node_id: String,
    /// Whether the batch was applied (or recognized as an idempotent replay)
    pub ok: bool,
    /// Failure detail when `ok` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
    /// Final per-batch statistics
    pub stats: BatchStats,
}

impl BatchAck {
    /// A successful ack.
    pub fn ok(batch_id: i64, node_id: impl Into<String>, stats: BatchStats) -> Self {
        Self {
            batch_id,
            node_id: node_id.into(),
            ok: true,
            error: None,
            stats,
        }
    }

    /// A failed ack carrying error detail.
    pub fn error(
        batch_id: i64,
        node_id: impl Into<String>,
        error: AckError,
        stats: BatchStats,
    ) -> Self {
        Self {
            batch_id,
            node_id: node_id.into(),
            ok: false,
            error: Some(error),
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_roundtrip() {
        let raw = b"\x00\x01binary\xff";
        for encoding in [BinaryEncoding::Base64, BinaryEncoding::Hex] {
            let text = encoding.encode(raw);
            assert_eq!(encoding.decode(&text).unwrap(), raw.to_vec());
        }
    }

    #[test]
    fn test_encoding_tokens() {
        assert_eq!(
            BinaryEncoding::from_token("base64").unwrap(),
            BinaryEncoding::Base64
        );
        assert!(BinaryEncoding::from_token("zip").is_err());
    }

    #[test]
    fn test_stats_merge() {
        let mut a = BatchStats {
            insert_count: 2,
            byte_count: 100,
            ..Default::default()
        };
        let b = BatchStats {
            insert_count: 1,
            update_count: 4,
            byte_count: 50,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.insert_count, 3);
        assert_eq!(a.update_count, 4);
        assert_eq!(a.byte_count, 150);
        assert_eq!(a.row_count(), 7);
    }

    #[test]
    fn test_ack_serialization() {
        let ack = BatchAck::error(
            42,
            "node-2",
            AckError {
                failed_row_number: Some(3),
                sql_state: Some("23505".to_string()),
                sql_code: None,
                message: "duplicate key".to_string(),
            },
            BatchStats::default(),
        );
        let json = serde_json::to_string(&ack).unwrap();
        let parsed: BatchAck = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ack);
    }
}
