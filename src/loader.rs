//! The load service: replays an incoming protocol stream batch by
//! batch, producing acknowledgments.

use anyhow::Context;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Instant;
use sync_load::{DatabaseWriter, IncomingBatchStore, LoadResult, SqlError};
use sync_model::batch::AckError;
use sync_model::{Batch, BatchAck, BatchStats, RowEvent, Table};
use sync_protocol::{ProtocolError, ProtocolReader};
use sync_transform::{TransformOutput, TransformPipeline, TransformPoint};
use tracing::{info, warn};

enum BatchFailure {
    /// Manual-resolution conflict (or failed fallback) at a given row.
    Conflict(Box<sync_load::ConflictEvent>, u64),
    /// Protocol or database failure.
    Error(anyhow::Error, Option<u64>),
}

/// Drives incoming streams end-to-end: protocol reader → load-point
/// transforms → database writer → acknowledgment.
///
/// One service instance processes one stream at a time (the writer
/// underneath is bound to one in-flight batch). A failed batch is
/// rolled back, acknowledged as errored, and the service moves on to
/// the next batch in the stream.
pub struct LoadService {
    /// This node's id, stamped into acks
    node_id: String,
    writer: DatabaseWriter,
    batch_store: Arc<dyn IncomingBatchStore>,
    pipeline: TransformPipeline,
    /// Treat manual conflicts as skips instead of failing the batch
    skip_conflicts: bool,
}

impl LoadService {
    pub fn new(
        node_id: impl Into<String>,
        writer: DatabaseWriter,
        batch_store: Arc<dyn IncomingBatchStore>,
        pipeline: TransformPipeline,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            writer,
            batch_store,
            pipeline,
            skip_conflicts: false,
        }
    }

    /// Record conflicts as skipped rows instead of halting the batch
    /// (builder style).
    pub fn with_skip_conflicts(mut self) -> Self {
        self.skip_conflicts = true;
        self
    }

    /// Process every batch on the stream, returning one ack per batch
    /// in stream order.
    ///
    /// Stream-level continuation: a batch that fails (parse error,
    /// fatal database error, manual conflict) is rolled back and
    /// acknowledged as errored, then the reader skips forward to the
    /// next `batch` record.
    pub async fn load_stream<R: BufRead>(&mut self, input: R) -> anyhow::Result<Vec<BatchAck>> {
        let mut reader = ProtocolReader::new(input);
        let mut acks = Vec::new();
        loop {
            let batch = match reader.next_batch() {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(error) => {
                    // header-level corruption: nothing to attribute a
                    // batch ack to
                    return Err(error).context("reading batch header");
                }
            };
            let ack = self.load_batch(&mut reader, &batch).await?;
            acks.push(ack);
        }
        Ok(acks)
    }

    async fn load_batch<R: BufRead>(
        &mut self,
        reader: &mut ProtocolReader<R>,
        batch: &Batch,
    ) -> anyhow::Result<BatchAck> {
        if self
            .batch_store
            .is_committed(&batch.source_node_id, batch.batch_id)
            .await?
        {
            info!(
                batch_id = batch.batch_id,
                source_node = batch.source_node_id.as_str(),
                "batch already committed; skipping idempotent replay"
            );
            drain_batch(reader)?;
            let mut stats = reader.take_batch_stats();
            stats.ignore_count += 1;
            return Ok(BatchAck::ok(batch.batch_id, self.node_id.clone(), stats));
        }

        self.writer
            .begin_batch(batch)
            .await
            .context("beginning batch")?;

        match self.apply_batch(reader, batch).await {
            Ok(()) => {
                let mut stats = self.writer.commit_batch().await.context("committing batch")?;
                self.batch_store
                    .mark_committed(&batch.source_node_id, batch.batch_id)
                    .await
                    .context("recording committed batch")?;
                stats.merge(&reader.take_batch_stats());
                Ok(BatchAck::ok(batch.batch_id, self.node_id.clone(), stats))
            }
            Err(failure) => {
                let mut stats = self
                    .writer
                    .rollback_batch()
                    .await
                    .context("rolling back failed batch")?;
                stats.merge(&reader.take_batch_stats());
                let error = match failure {
                    BatchFailure::Conflict(conflict, row_number) => {
                        warn!(
                            batch_id = batch.batch_id,
                            table = conflict.table.as_str(),
                            row = row_number,
                            "batch halted on conflict: {}",
                            conflict.message
                        );
                        AckError {
                            failed_row_number: Some(row_number),
                            sql_code: None,
                            sql_state: None,
                            message: format!(
                                "conflict on {} ({}): {}",
                                conflict.table, conflict.status, conflict.message
                            ),
                        }
                    }
                    BatchFailure::Error(error, row_number) => {
                        warn!(batch_id = batch.batch_id, "batch failed: {error:#}");
                        let sql = error.chain().find_map(|cause| cause.downcast_ref::<SqlError>());
                        AckError {
                            failed_row_number: row_number,
                            sql_code: sql.and_then(|s| s.code),
                            sql_state: sql.and_then(|s| s.state.clone()),
                            message: format!("{error:#}"),
                        }
                    }
                };
                Ok(BatchAck::error(
                    batch.batch_id,
                    self.node_id.clone(),
                    error,
                    stats,
                ))
            }
        }
    }

    async fn apply_batch<R: BufRead>(
        &mut self,
        reader: &mut ProtocolReader<R>,
        batch: &Batch,
    ) -> Result<(), BatchFailure> {
        let mut row_number: u64 = 0;
        loop {
            let table = match reader.next_table() {
                Ok(Some(table)) => table,
                Ok(None) => return Ok(()),
                Err(error) => {
                    return Err(BatchFailure::Error(
                        anyhow::Error::new(error).context("reading table definition"),
                        None,
                    ))
                }
            };
            loop {
                let event = match reader.next_event() {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(error) => {
                        let row = parse_failure_row(&error, row_number);
                        return Err(BatchFailure::Error(
                            anyhow::Error::new(error).context("reading row event"),
                            row,
                        ));
                    }
                };
                row_number += 1;
                self.apply_event(batch, &table, event, row_number).await?;
            }
        }
    }

    async fn apply_event(
        &mut self,
        batch: &Batch,
        table: &Table,
        event: RowEvent,
        row_number: u64,
    ) -> Result<(), BatchFailure> {
        let filter_started = Instant::now();
        let output = self
            .pipeline
            .transform(
                TransformPoint::Load,
                table,
                &event,
                &batch.source_node_id,
                &self.node_id,
            )
            .map_err(|e| BatchFailure::Error(anyhow::Error::new(e), Some(row_number)))?;
        let filter_millis = filter_started.elapsed().as_millis() as u64;

        let targets: Vec<(Table, RowEvent)> = match output {
            TransformOutput::Unmatched => vec![(table.clone(), event)],
            TransformOutput::Events(events) => events,
        };
        for (target_table, target_event) in targets {
            let result = self
                .writer
                .load_event(&target_table, &target_event)
                .await
                .map_err(|e| BatchFailure::Error(e, Some(row_number)))?;
            match result {
                LoadResult::Applied | LoadResult::Skipped => {}
                LoadResult::Conflict(conflict) => {
                    if self.skip_conflicts {
                        warn!(
                            table = conflict.table.as_str(),
                            row = row_number,
                            "skipping conflicted row per configuration: {}",
                            conflict.message
                        );
                        continue;
                    }
                    return Err(BatchFailure::Conflict(conflict, row_number));
                }
            }
        }
        // transform time is part of the ack's filter_millis
        let mut filter = BatchStats::default();
        filter.filter_millis = filter_millis;
        self.merge_filter_stats(filter);
        Ok(())
    }

    fn merge_filter_stats(&mut self, stats: BatchStats) {
        // the writer owns the per-batch accumulator; fold transform time
        // into it so commit/rollback hands back one complete set
        self.writer.merge_stats(&stats);
    }
}

/// Row ordinal to report for a parse failure: parse failures are only
/// attributable when at least one row parsed before them.
fn parse_failure_row(_error: &ProtocolError, parsed_rows: u64) -> Option<u64> {
    if parsed_rows > 0 {
        Some(parsed_rows)
    } else {
        None
    }
}

/// Consume the remaining records of the current batch without applying
/// anything (idempotent-replay skip).
fn drain_batch<R: BufRead>(reader: &mut ProtocolReader<R>) -> Result<(), ProtocolError> {
    while let Some(_table) = reader.next_table()? {
        while reader.next_event()?.is_some() {}
    }
    Ok(())
}
