//! The extract service: serializes routed outgoing batches onto the
//! wire.

use anyhow::Context;
use std::io::Write;
use sync_model::{Batch, BatchStats, BinaryEncoding, Column, ColumnTypeCode, RowEvent, Table};
use sync_protocol::ProtocolWriter;
use sync_route::{ChangeRow, OutgoingBatch};
use sync_transform::{TransformOutput, TransformPipeline, TransformPoint};
use tracing::debug;

/// Turns [`OutgoingBatch`]es into protocol streams, applying
/// extract-point transforms on the way out.
///
/// One service instance writes one stream at a time; table definitions
/// are cached per stream by the underlying [`ProtocolWriter`], so a
/// table referenced by many batches is only described once.
pub struct ExtractService {
    /// This (source) node's id, declared at stream start
    node_id: String,
    pipeline: TransformPipeline,
    binary_encoding: BinaryEncoding,
}

impl ExtractService {
    pub fn new(node_id: impl Into<String>, pipeline: TransformPipeline) -> Self {
        Self {
            node_id: node_id.into(),
            pipeline,
            binary_encoding: BinaryEncoding::Hex,
        }
    }

    /// Set the binary-column encoding declared on extracted streams
    /// (builder style).
    pub fn with_binary_encoding(mut self, encoding: BinaryEncoding) -> Self {
        self.binary_encoding = encoding;
        self
    }

    /// Write the stream prologue: source node and binary encoding.
    pub fn begin_stream<W: Write>(&self, out: &mut ProtocolWriter<W>) -> anyhow::Result<()> {
        out.write_node_id(&self.node_id)
            .context("writing stream node id")?;
        out.write_binary_encoding(self.binary_encoding)
            .context("writing stream binary encoding")?;
        Ok(())
    }

    /// Serialize one batch, returning the bytes-and-rows accounting for
    /// its outgoing side.
    pub fn extract_batch<W: Write>(
        &self,
        batch: &OutgoingBatch,
        out: &mut ProtocolWriter<W>,
    ) -> anyhow::Result<BatchStats> {
        let wire_batch = Batch::new(batch.batch_id, batch.channel_id.clone(), self.node_id.clone())
            .with_encoding(self.binary_encoding);
        out.start_batch(&wire_batch).context("starting batch")?;

        for row in &batch.events {
            let source_table = table_of(row);
            let event = event_of(row, &source_table);
            let output = self
                .pipeline
                .transform(
                    TransformPoint::Extract,
                    &source_table,
                    &event,
                    &self.node_id,
                    &batch.node_id,
                )
                .with_context(|| format!("transforming data id {}", row.data_id))?;
            match output {
                TransformOutput::Unmatched => {
                    out.write_table(&source_table).context("writing table")?;
                    out.write_event(&event).context("writing event")?;
                }
                TransformOutput::Events(events) => {
                    debug!(
                        data_id = row.data_id,
                        produced = events.len(),
                        "extract transform applied"
                    );
                    for (target_table, target_event) in events {
                        out.write_table(&target_table).context("writing table")?;
                        out.write_event(&target_event).context("writing event")?;
                    }
                }
            }
        }

        out.commit_batch(batch.batch_id).context("committing batch")?;
        Ok(out.take_batch_stats())
    }
}

/// Schema metadata reconstructed from what the trigger captured.
fn table_of(row: &ChangeRow) -> Table {
    let columns = row
        .column_names
        .iter()
        .map(|name| {
            let mut column = Column::new(name.clone(), ColumnTypeCode::Other);
            column.primary_key = row
                .pk_column_names
                .iter()
                .any(|key| key.eq_ignore_ascii_case(name));
            column
        })
        .collect();
    Table::qualified(
        row.catalog.clone(),
        row.schema.clone(),
        row.table.clone(),
        columns,
    )
}

/// Wire event for a change row. Updates and deletes are guaranteed a
/// key-value set (derived from the row or before image when the trigger
/// did not capture one separately) because the wire format's positional
/// split depends on it.
fn event_of(row: &ChangeRow, table: &Table) -> RowEvent {
    use sync_model::EventType::*;
    let derive_pk = |values: &Option<Vec<sync_model::event::Cell>>| {
        values.as_ref().map(|cells| {
            table
                .primary_key_names()
                .iter()
                .filter_map(|key| table.column_index(key))
                .map(|i| cells.get(i).cloned().flatten())
                .collect::<Vec<_>>()
        })
    };
    let pk_data = match row.event_type {
        Update => row
            .pk_data
            .clone()
            .or_else(|| derive_pk(&row.row_data)),
        Delete => row
            .pk_data
            .clone()
            .or_else(|| derive_pk(&row.old_data)),
        _ => row.pk_data.clone(),
    };
    RowEvent {
        event_type: row.event_type,
        row_data: row.row_data.clone(),
        old_data: row.old_data.clone(),
        pk_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use sync_model::EventType;
    use sync_transform::TransformRegistry;

    fn change_row(data_id: i64, event_type: EventType) -> ChangeRow {
        ChangeRow {
            data_id,
            transaction_id: None,
            trigger_id: "t".to_string(),
            channel_id: "default".to_string(),
            catalog: None,
            schema: None,
            table: "item".to_string(),
            column_names: vec!["id".to_string(), "name".to_string()],
            pk_column_names: vec!["id".to_string()],
            event_type,
            row_data: Some(vec![Some(data_id.to_string()), Some("x".to_string())]),
            old_data: None,
            pk_data: None,
            create_time: Utc::now(),
        }
    }

    fn service() -> ExtractService {
        let pipeline =
            TransformPipeline::new(Arc::new(TransformRegistry::with_builtins()), vec![]);
        ExtractService::new("root", pipeline).with_binary_encoding(BinaryEncoding::Base64)
    }

    #[test]
    fn test_extracted_stream_shape() {
        let batch = OutgoingBatch {
            batch_id: 12,
            node_id: "store-1".to_string(),
            channel_id: "default".to_string(),
            events: vec![change_row(1, EventType::Insert), change_row(2, EventType::Insert)],
            stats: BatchStats::default(),
            sealed_at: Utc::now(),
        };
        let service = service();
        let mut out = ProtocolWriter::new(Vec::new());
        service.begin_stream(&mut out).unwrap();
        let stats = service.extract_batch(&batch, &mut out).unwrap();
        assert_eq!(stats.insert_count, 2);

        let text = String::from_utf8(out.into_inner()).unwrap();
        assert!(text.starts_with("nodeid,root\nbinary,BASE64\n"));
        assert!(text.contains("channel,default\nbinary,BASE64\nbatch,12\n"));
        assert!(text.contains("keys,id\ncolumns,id,name\n"));
        assert!(text.contains("insert,1,x\ninsert,2,x\ncommit,12\n"));
        // the second row reuses the cached table definition
        assert_eq!(text.matches("columns,").count(), 1);
    }

    #[test]
    fn test_update_gets_derived_key_values() {
        let mut row = change_row(7, EventType::Update);
        row.pk_data = None;
        let batch = OutgoingBatch {
            batch_id: 13,
            node_id: "store-1".to_string(),
            channel_id: "default".to_string(),
            events: vec![row],
            stats: BatchStats::default(),
            sealed_at: Utc::now(),
        };
        let service = service();
        let mut out = ProtocolWriter::new(Vec::new());
        let stats = service.extract_batch(&batch, &mut out).unwrap();
        assert_eq!(stats.update_count, 1);
        let text = String::from_utf8(out.into_inner()).unwrap();
        // row values then the derived key value
        assert!(text.contains("update,7,x,7\n"));
    }
}
