//! Streaming writer for the batch wire format.

use crate::fields::join_record;
use crate::{tokens, Result};
use std::collections::HashSet;
use std::io::Write;
use sync_model::event::Cell;
use sync_model::{Batch, BatchStats, BinaryEncoding, EventType, RowEvent, Table};

/// Serializes batches, table definitions, and row events onto a byte
/// stream in wire order.
///
/// Mirrors [`crate::ProtocolReader`]: table definitions already written
/// in this stream session are suppressed down to a bare `table` record
/// (the peer reads them back out of its own session cache), and
/// `catalog`/`schema` context records are only emitted when the context
/// actually changes.
pub struct ProtocolWriter<W: Write> {
    output: W,
    written_tables: HashSet<String>,
    catalog: Option<String>,
    schema: Option<String>,
    context_written: bool,
    stats: BatchStats,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            written_tables: HashSet::new(),
            catalog: None,
            schema: None,
            context_written: false,
            stats: BatchStats::default(),
        }
    }

    /// Declare the source node for the whole stream.
    pub fn write_node_id(&mut self, node_id: &str) -> Result<()> {
        self.write_record(tokens::NODEID, &[Some(node_id.to_string())])
    }

    /// Declare the binary-column encoding for subsequent rows.
    pub fn write_binary_encoding(&mut self, encoding: BinaryEncoding) -> Result<()> {
        self.write_record(tokens::BINARY, &[Some(encoding.as_token().to_string())])
    }

    /// Declare the channel for subsequent batches.
    pub fn write_channel(&mut self, channel_id: &str) -> Result<()> {
        self.write_record(tokens::CHANNEL, &[Some(channel_id.to_string())])
    }

    /// Start a batch, emitting channel/encoding context as needed and
    /// resetting the per-batch statistics.
    pub fn start_batch(&mut self, batch: &Batch) -> Result<()> {
        self.stats = BatchStats::default();
        if !batch.channel_id.is_empty() {
            self.write_channel(&batch.channel_id)?;
        }
        if batch.binary_encoding != BinaryEncoding::None {
            self.write_binary_encoding(batch.binary_encoding)?;
        }
        self.write_record(tokens::BATCH, &[Some(batch.batch_id.to_string())])
    }

    /// Write a table definition, suppressing `keys`/`columns` when this
    /// stream session has already carried the full definition.
    pub fn write_table(&mut self, table: &Table) -> Result<()> {
        if self.catalog != table.catalog || !self.context_written {
            self.write_record(tokens::CATALOG, &[table.catalog.clone()])?;
            self.catalog = table.catalog.clone();
        }
        if self.schema != table.schema || !self.context_written {
            self.write_record(tokens::SCHEMA, &[table.schema.clone()])?;
            self.schema = table.schema.clone();
        }
        self.context_written = true;

        self.write_record(tokens::TABLE, &[Some(table.name.clone())])?;

        let qualified = table.qualified_name();
        if self.written_tables.contains(&qualified) {
            return Ok(());
        }
        let keys: Vec<Cell> = table
            .primary_key_names()
            .into_iter()
            .map(|n| Some(n.to_string()))
            .collect();
        if !keys.is_empty() {
            self.write_record(tokens::KEYS, &keys)?;
        }
        let columns: Vec<Cell> = table
            .column_names()
            .into_iter()
            .map(|n| Some(n.to_string()))
            .collect();
        self.write_record(tokens::COLUMNS, &columns)?;
        self.written_tables.insert(qualified);
        Ok(())
    }

    /// Write one row event, including its `old` record when before
    /// values are present.
    pub fn write_event(&mut self, event: &RowEvent) -> Result<()> {
        match event.event_type {
            EventType::Insert => {
                let row = event.row_data.clone().unwrap_or_default();
                self.write_record(tokens::INSERT, &row)?;
            }
            EventType::Update => {
                if let Some(old) = &event.old_data {
                    self.write_record(tokens::OLD, old)?;
                }
                let mut cells = event.row_data.clone().unwrap_or_default();
                if let Some(pk) = &event.pk_data {
                    cells.extend(pk.iter().cloned());
                }
                self.write_record(tokens::UPDATE, &cells)?;
            }
            EventType::Delete => {
                if let Some(old) = &event.old_data {
                    self.write_record(tokens::OLD, old)?;
                }
                let pk = event.pk_data.clone().unwrap_or_default();
                self.write_record(tokens::DELETE, &pk)?;
            }
            EventType::Sql | EventType::Create | EventType::Script => {
                let token = event.event_type.as_token();
                let payload = event.payload_text().unwrap_or_default().to_string();
                self.write_record(token, &[Some(payload)])?;
            }
        }
        self.stats.count_event(event.event_type);
        Ok(())
    }

    /// End the batch with its commit trailer.
    pub fn commit_batch(&mut self, batch_id: i64) -> Result<()> {
        self.write_record(tokens::COMMIT, &[Some(batch_id.to_string())])?;
        self.output.flush()?;
        Ok(())
    }

    /// Statistics for the batch in progress.
    pub fn batch_stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Hand the per-batch statistics to the caller, resetting them.
    pub fn take_batch_stats(&mut self) -> BatchStats {
        std::mem::take(&mut self.stats)
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> W {
        self.output
    }

    fn write_record(&mut self, directive: &str, cells: &[Cell]) -> Result<()> {
        let record = join_record(directive, cells);
        self.output.write_all(record.as_bytes())?;
        self.output.write_all(b"\n")?;
        self.stats.byte_count += record.len() as u64 + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_model::{Column, ColumnTypeCode};

    fn sample_table() -> Table {
        let mut table = Table::new(
            "customer",
            vec![
                Column::primary_key("id", ColumnTypeCode::BigInt),
                Column::new("name", ColumnTypeCode::Varchar),
            ],
        );
        table.schema = Some("crm".to_string());
        table
    }

    #[test]
    fn test_written_stream_shape() {
        let mut w = ProtocolWriter::new(Vec::new());
        w.write_node_id("store-001").unwrap();
        let batch = Batch::new(7, "sale", "store-001");
        w.start_batch(&batch).unwrap();
        w.write_table(&sample_table()).unwrap();
        w.write_event(&RowEvent::insert(vec![Some("1".into()), None]))
            .unwrap();
        w.commit_batch(7).unwrap();

        let text = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(
            text,
            "nodeid,store-001\nchannel,sale\nbatch,7\ncatalog,\nschema,crm\ntable,customer\nkeys,id\ncolumns,id,name\ninsert,1,\ncommit,7\n"
        );
    }

    #[test]
    fn test_table_suppression_on_second_reference() {
        let mut w = ProtocolWriter::new(Vec::new());
        let batch = Batch::new(1, "default", "n");
        w.start_batch(&batch).unwrap();
        w.write_table(&sample_table()).unwrap();
        w.write_table(&sample_table()).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(text.matches("columns,").count(), 1);
        assert_eq!(text.matches("table,customer").count(), 2);
    }

    #[test]
    fn test_update_field_order() {
        let mut w = ProtocolWriter::new(Vec::new());
        let batch = Batch::new(1, "default", "n");
        w.start_batch(&batch).unwrap();
        w.write_table(&sample_table()).unwrap();
        let event = RowEvent::update(vec![Some("9".into()), Some("zed".into())], vec![Some("1".into())])
            .with_old_data(vec![Some("1".into()), Some("z".into())]);
        w.write_event(&event).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        assert!(text.contains("old,1,z\nupdate,9,zed,1\n"));
    }

    #[test]
    fn test_event_counting() {
        let mut w = ProtocolWriter::new(Vec::new());
        let batch = Batch::new(1, "default", "n");
        w.start_batch(&batch).unwrap();
        w.write_table(&sample_table()).unwrap();
        w.write_event(&RowEvent::insert(vec![Some("1".into()), None])).unwrap();
        w.write_event(&RowEvent::delete(vec![Some("1".into())])).unwrap();
        assert_eq!(w.batch_stats().insert_count, 1);
        assert_eq!(w.batch_stats().delete_count, 1);
        assert!(w.batch_stats().byte_count > 0);
    }
}
