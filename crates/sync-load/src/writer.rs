//! The database writer: replays row events against the target database.

use crate::conflict::{
    compare_newer_wins, resolution_plan, ComparisonOutcome, ConflictSettings, ResolutionPlan,
};
use crate::mapping::{map_by_names, ColumnMapper};
use crate::platform::{effective_keys, DbTransaction, Platform, SqlErrorKind};
use crate::{ConflictEvent, LoadResult, LoadStatus};
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use sync_model::event::Cell;
use sync_model::{Batch, BatchStats, BinaryEncoding, Column, EventType, RowEvent, Table};
use tracing::{debug, warn};

/// Injected capability for executing script payload events.
///
/// Replicas that do not enable scripting simply configure no handler;
/// script events are then counted as ignored rather than failing the
/// batch.
#[async_trait]
pub trait ScriptEventHandler: Send + Sync {
    async fn execute(&self, body: &str, tx: &mut dyn DbTransaction) -> anyhow::Result<()>;
}

/// Applies one [`RowEvent`] at a time within a per-batch transaction.
///
/// Not reentrant: one writer instance is bound to at most one in-flight
/// batch. Rows are applied strictly in call order; the caller provides
/// wire order.
///
/// A primary-key violation on INSERT and a zero-rows-affected UPDATE or
/// DELETE are recoverable conditions routed into conflict resolution;
/// every other database error aborts the batch by propagating.
pub struct DatabaseWriter {
    platform: Arc<dyn Platform>,
    settings: ConflictSettings,
    script_handler: Option<Arc<dyn ScriptEventHandler>>,
    mapper: ColumnMapper,
    batch: Option<Batch>,
    tx: Option<Box<dyn DbTransaction>>,
    stats: BatchStats,
}

impl DatabaseWriter {
    pub fn new(platform: Arc<dyn Platform>, settings: ConflictSettings) -> Self {
        Self {
            platform,
            settings,
            script_handler: None,
            mapper: ColumnMapper::new(),
            batch: None,
            tx: None,
            stats: BatchStats::default(),
        }
    }

    /// Attach a script-event handler (builder style).
    pub fn with_script_handler(mut self, handler: Arc<dyn ScriptEventHandler>) -> Self {
        self.script_handler = Some(handler);
        self
    }

    /// Drop all cached column mappings (e.g. after DDL was applied
    /// between batches).
    pub fn clear_mappings(&mut self) {
        self.mapper.clear();
    }

    /// Open the batch transaction and reset per-batch statistics.
    pub async fn begin_batch(&mut self, batch: &Batch) -> anyhow::Result<()> {
        if self.tx.is_some() {
            bail!("writer already has batch {:?} in flight", self.batch.as_ref().map(|b| b.batch_id));
        }
        let tx = self
            .platform
            .begin()
            .await
            .with_context(|| format!("opening transaction for batch {}", batch.batch_id))?;
        self.tx = Some(tx);
        self.batch = Some(batch.clone());
        self.stats = BatchStats::default();
        Ok(())
    }

    /// Commit the batch transaction, handing back its statistics.
    pub async fn commit_batch(&mut self) -> anyhow::Result<BatchStats> {
        let tx = self.tx.take().context("no batch in flight")?;
        tx.commit().await.context("committing batch transaction")?;
        self.batch = None;
        Ok(std::mem::take(&mut self.stats))
    }

    /// Roll the batch transaction back, handing back the statistics
    /// accumulated before the failure.
    pub async fn rollback_batch(&mut self) -> anyhow::Result<BatchStats> {
        let tx = self.tx.take().context("no batch in flight")?;
        tx.rollback().await.context("rolling back batch transaction")?;
        self.batch = None;
        Ok(std::mem::take(&mut self.stats))
    }

    /// Per-batch statistics accumulated so far.
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Fold externally-accumulated statistics (transform timing, filter
    /// counters) into the current batch's accumulator.
    pub fn merge_stats(&mut self, other: &BatchStats) {
        self.stats.merge(other);
    }

    /// Apply one event. `source_table` is the table definition the
    /// event's positional values follow (from the wire or from a
    /// transform).
    pub async fn load_event(
        &mut self,
        source_table: &Table,
        event: &RowEvent,
    ) -> anyhow::Result<LoadResult> {
        let started = Instant::now();
        let result = self.load_event_inner(source_table, event).await;
        self.stats.load_millis += started.elapsed().as_millis() as u64;
        result
    }

    async fn load_event_inner(
        &mut self,
        source_table: &Table,
        event: &RowEvent,
    ) -> anyhow::Result<LoadResult> {
        match event.event_type {
            EventType::Sql | EventType::Create => {
                let payload = event.payload_text().unwrap_or_default().to_string();
                let tx = self.tx.as_mut().context("no batch in flight")?;
                tx.execute_raw(&payload)
                    .await
                    .with_context(|| format!("executing {} payload", event.event_type))?;
                self.stats.statement_count += 1;
                self.stats.count_event(event.event_type);
                Ok(LoadResult::Applied)
            }
            EventType::Script => {
                let payload = event.payload_text().unwrap_or_default().to_string();
                match self.script_handler.clone() {
                    Some(handler) => {
                        let tx = self.tx.as_mut().context("no batch in flight")?;
                        handler
                            .execute(&payload, tx.as_mut())
                            .await
                            .context("executing script payload")?;
                        self.stats.count_event(EventType::Script);
                        Ok(LoadResult::Applied)
                    }
                    None => {
                        warn!("script event received but no script engine is configured; skipping");
                        self.stats.ignore_count += 1;
                        Ok(LoadResult::Skipped)
                    }
                }
            }
            EventType::Insert | EventType::Update | EventType::Delete => {
                self.load_dml(source_table, event).await
            }
        }
    }

    async fn load_dml(
        &mut self,
        source_table: &Table,
        event: &RowEvent,
    ) -> anyhow::Result<LoadResult> {
        let target = self
            .platform
            .table(
                source_table.catalog.as_deref(),
                source_table.schema.as_deref(),
                &source_table.name,
            )
            .await
            .with_context(|| format!("reading target table {}", source_table.qualified_name()))?
            .with_context(|| {
                format!(
                    "target table {} does not exist",
                    source_table.qualified_name()
                )
            })?;
        let encoding = self
            .batch
            .as_ref()
            .map(|b| b.binary_encoding)
            .unwrap_or_default();

        // target-ordered row values (update/insert) and key values
        let mapping = self.mapper.mapping(source_table, &target);
        let mut row_values = match &event.row_data {
            Some(values) => ColumnMapper::map_values(&mapping, values),
            None => Vec::new(),
        };
        normalize_binary(&target, &mut row_values, encoding)?;
        let key_values = self.target_key_values(source_table, &target, event, &row_values)?;
        // only target columns the source actually feeds belong in an
        // UPDATE's SET list; the rest must keep their stored values
        let set_pairs: Vec<(Column, Cell)> = target
            .columns
            .iter()
            .enumerate()
            .filter(|(i, column)| !column.primary_key && mapping.get(*i).copied().flatten().is_some())
            .map(|(i, column)| (column.clone(), row_values.get(i).cloned().flatten()))
            .collect();

        match event.event_type {
            EventType::Insert => {
                let statement = self.platform.build_insert(&target);
                self.stats.statement_count += 1;
                let tx = self.tx.as_mut().context("no batch in flight")?;
                match tx.execute(&statement, &row_values).await {
                    Ok(_) => {
                        self.stats.insert_count += 1;
                        Ok(LoadResult::Applied)
                    }
                    Err(error) if error.kind == SqlErrorKind::UniqueViolation => {
                        debug!(table = %target.qualified_name(), "insert hit existing row");
                        self.resolve_conflict(
                            &target,
                            event,
                            LoadStatus::PkViolation,
                            &row_values,
                            &set_pairs,
                            &key_values,
                        )
                        .await
                    }
                    Err(error) => Err(error).with_context(|| {
                        format!("inserting into {}", target.qualified_name())
                    }),
                }
            }
            EventType::Update => {
                if set_pairs.is_empty() {
                    // key-only table or nothing mapped: nothing to set
                    debug!(table = %target.qualified_name(), "update carries no settable columns");
                    self.stats.update_count += 1;
                    return Ok(LoadResult::Applied);
                }
                let (set_columns, set_values) = split_pairs(&set_pairs);
                let statement = self.platform.build_update(&target, &set_columns);
                let mut values = set_values;
                values.extend(key_values.iter().cloned());
                self.stats.statement_count += 1;
                let tx = self.tx.as_mut().context("no batch in flight")?;
                match tx.execute(&statement, &values).await {
                    Ok(0) => {
                        debug!(table = %target.qualified_name(), "update matched no rows");
                        self.resolve_conflict(
                            &target,
                            event,
                            LoadStatus::MissingRow,
                            &row_values,
                            &set_pairs,
                            &key_values,
                        )
                        .await
                    }
                    Ok(_) => {
                        self.stats.update_count += 1;
                        Ok(LoadResult::Applied)
                    }
                    Err(error) if error.kind == SqlErrorKind::UniqueViolation => {
                        // an update that collides on a key column
                        self.resolve_conflict(
                            &target,
                            event,
                            LoadStatus::PkViolation,
                            &row_values,
                            &set_pairs,
                            &key_values,
                        )
                        .await
                    }
                    Err(error) => {
                        Err(error).with_context(|| format!("updating {}", target.qualified_name()))
                    }
                }
            }
            EventType::Delete => {
                let statement = self.platform.build_delete(&target);
                self.stats.statement_count += 1;
                let tx = self.tx.as_mut().context("no batch in flight")?;
                match tx.execute(&statement, &key_values).await {
                    Ok(0) => {
                        self.resolve_conflict(
                            &target,
                            event,
                            LoadStatus::MissingRow,
                            &row_values,
                            &set_pairs,
                            &key_values,
                        )
                        .await
                    }
                    Ok(_) => {
                        self.stats.delete_count += 1;
                        Ok(LoadResult::Applied)
                    }
                    Err(error) => {
                        Err(error).with_context(|| format!("deleting from {}", target.qualified_name()))
                    }
                }
            }
            _ => unreachable!("non-DML events handled by load_event"),
        }
    }

    /// Key values in the target's effective-key order.
    ///
    /// UPDATE/DELETE carry explicit key values positional to the source
    /// key columns; INSERT derives them from the mapped row (needed for
    /// fallback-as-update and newer-wins probes).
    fn target_key_values(
        &self,
        source_table: &Table,
        target: &Table,
        event: &RowEvent,
        mapped_row: &[Cell],
    ) -> anyhow::Result<Vec<Cell>> {
        let target_keys = effective_keys(target);
        let target_key_names: Vec<&str> = target_keys.iter().map(|c| c.name.as_str()).collect();
        match event.event_type {
            EventType::Insert => Ok(target_keys
                .iter()
                .map(|key| {
                    target
                        .column_index(&key.name)
                        .and_then(|i| mapped_row.get(i))
                        .cloned()
                        .flatten()
                })
                .collect()),
            _ => {
                let (source_key_names, raw_values): (Vec<&str>, &Vec<Cell>) =
                    match (&event.pk_data, &event.row_data, &event.old_data) {
                        (Some(pk), _, _) if source_table.has_primary_key() => {
                            (source_table.primary_key_names(), pk)
                        }
                        (Some(pk), _, _) => (source_table.column_names(), pk),
                        (None, _, Some(old)) => (source_table.column_names(), old),
                        (None, Some(row), None) => (source_table.column_names(), row),
                        (None, None, None) => {
                            bail!(
                                "{} event for {} carries no key values",
                                event.event_type,
                                source_table.qualified_name()
                            )
                        }
                    };
                Ok(map_by_names(&source_key_names, raw_values, &target_key_names))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_conflict(
        &mut self,
        target: &Table,
        event: &RowEvent,
        status: LoadStatus,
        row_values: &[Cell],
        set_pairs: &[(Column, Cell)],
        key_values: &[Cell],
    ) -> anyhow::Result<LoadResult> {
        let channel = self
            .batch
            .as_ref()
            .map(|b| b.channel_id.clone())
            .unwrap_or_else(|| "default".to_string());
        let qualified = target.qualified_name();
        let setting = self.settings.resolve(&qualified, &channel);
        let original = event.event_type;
        let plan = resolution_plan(original, status, &setting);
        debug!(table = %qualified, ?plan, %status, "resolving conflict");

        match plan {
            ResolutionPlan::Manual => Ok(self.conflict(target, event, status, "manual resolution required")),
            ResolutionPlan::Unsupported => Ok(self.conflict(
                target,
                event,
                status,
                "column-granularity ignore is not supported for row conflicts",
            )),
            ResolutionPlan::IgnoreRow => {
                if original == EventType::Delete {
                    self.stats.missing_delete_count += 1;
                } else {
                    self.stats.ignore_count += 1;
                }
                Ok(LoadResult::Skipped)
            }
            ResolutionPlan::RetryAsUpdate => {
                if self.retry_as_update(target, set_pairs, key_values).await? {
                    self.stats.fallback_update_count += 1;
                    Ok(LoadResult::Applied)
                } else {
                    Ok(self.conflict(target, event, status, "fallback update matched no rows"))
                }
            }
            ResolutionPlan::RetryAsInsert => {
                if self.retry_as_insert(target, row_values).await? {
                    self.stats.fallback_insert_count += 1;
                    Ok(LoadResult::Applied)
                } else {
                    Ok(self.conflict(target, event, status, "fallback insert hit an existing row"))
                }
            }
            ResolutionPlan::CompareAndSwap => {
                self.newer_wins(target, event, status, row_values, set_pairs, key_values, &setting)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn newer_wins(
        &mut self,
        target: &Table,
        event: &RowEvent,
        status: LoadStatus,
        row_values: &[Cell],
        set_pairs: &[(Column, Cell)],
        key_values: &[Cell],
        setting: &crate::ConflictSetting,
    ) -> anyhow::Result<LoadResult> {
        let detection = match &setting.detection {
            Some(detection) => detection.clone(),
            None => {
                return Ok(self.conflict(
                    target,
                    event,
                    status,
                    "newer-wins policy configured without a detection column",
                ))
            }
        };
        let column = match target.column(detection.column_name()) {
            Some(column) => column.clone(),
            None => {
                return Ok(self.conflict(
                    target,
                    event,
                    status,
                    &format!(
                        "detection column {} does not exist on {}",
                        detection.column_name(),
                        target.qualified_name()
                    ),
                ))
            }
        };
        let incoming = target
            .column_index(&column.name)
            .and_then(|i| row_values.get(i))
            .cloned()
            .flatten();

        let key_columns = effective_keys(target);
        let tx = self.tx.as_mut().context("no batch in flight")?;
        let existing = tx
            .query_scalar(target, &column, &key_columns, key_values)
            .await
            .with_context(|| format!("probing {} for newer-wins", target.qualified_name()))?;

        let outcome = match compare_newer_wins(
            &detection,
            incoming.as_deref(),
            existing.as_ref().map(|cell| cell.as_deref()),
        ) {
            Ok(outcome) => outcome,
            Err(reason) => return Ok(self.conflict(target, event, status, &reason)),
        };

        match outcome {
            ComparisonOutcome::ExistingWins => {
                debug!(table = %target.qualified_name(), "existing row wins; dropping incoming change");
                self.stats.ignore_count += 1;
                Ok(LoadResult::Skipped)
            }
            ComparisonOutcome::IncomingWins => match status {
                LoadStatus::PkViolation => {
                    if self.retry_as_update(target, set_pairs, key_values).await? {
                        self.stats.fallback_update_count += 1;
                        Ok(LoadResult::Applied)
                    } else {
                        Ok(self.conflict(target, event, status, "winning update matched no rows"))
                    }
                }
                LoadStatus::MissingRow => {
                    if self.retry_as_insert(target, row_values).await? {
                        self.stats.fallback_insert_count += 1;
                        Ok(LoadResult::Applied)
                    } else {
                        Ok(self.conflict(target, event, status, "winning insert hit an existing row"))
                    }
                }
            },
        }
    }

    /// Retry as UPDATE; `Ok(false)` means the retry itself conflicted
    /// (zero rows), which the caller surfaces, never retries again.
    async fn retry_as_update(
        &mut self,
        target: &Table,
        set_pairs: &[(Column, Cell)],
        key_values: &[Cell],
    ) -> anyhow::Result<bool> {
        if set_pairs.is_empty() {
            // the row already exists under the right key and there is
            // nothing to set
            return Ok(true);
        }
        let (set_columns, set_values) = split_pairs(set_pairs);
        let statement = self.platform.build_update(target, &set_columns);
        let mut values = set_values;
        values.extend(key_values.iter().cloned());
        self.stats.statement_count += 1;
        let tx = self.tx.as_mut().context("no batch in flight")?;
        match tx.execute(&statement, &values).await {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(error) if error.kind == SqlErrorKind::UniqueViolation => Ok(false),
            Err(error) => {
                Err(error).with_context(|| format!("fallback update of {}", target.qualified_name()))
            }
        }
    }

    /// Retry as INSERT; `Ok(false)` means the retry itself conflicted.
    async fn retry_as_insert(
        &mut self,
        target: &Table,
        row_values: &[Cell],
    ) -> anyhow::Result<bool> {
        let statement = self.platform.build_insert(target);
        self.stats.statement_count += 1;
        let tx = self.tx.as_mut().context("no batch in flight")?;
        match tx.execute(&statement, row_values).await {
            Ok(_) => Ok(true),
            Err(error) if error.kind == SqlErrorKind::UniqueViolation => Ok(false),
            Err(error) => {
                Err(error).with_context(|| format!("fallback insert into {}", target.qualified_name()))
            }
        }
    }

    fn conflict(
        &self,
        target: &Table,
        event: &RowEvent,
        status: LoadStatus,
        message: &str,
    ) -> LoadResult {
        LoadResult::Conflict(Box::new(ConflictEvent {
            table: target.qualified_name(),
            event: event.clone(),
            original_type: event.event_type,
            status,
            message: message.to_string(),
        }))
    }
}

/// Split (column, value) pairs into the parallel vectors the statement
/// builders and binders want.
fn split_pairs(set_pairs: &[(Column, Cell)]) -> (Vec<Column>, Vec<Cell>) {
    (
        set_pairs.iter().map(|(c, _)| c.clone()).collect(),
        set_pairs.iter().map(|(_, v)| v.clone()).collect(),
    )
}

/// Normalize binary cells to hex so every platform sees one canonical
/// text form regardless of the batch's wire encoding.
fn normalize_binary(
    target: &Table,
    values: &mut [Cell],
    encoding: BinaryEncoding,
) -> anyhow::Result<()> {
    if encoding == BinaryEncoding::Hex || values.is_empty() {
        return Ok(());
    }
    for (column, value) in target.columns.iter().zip(values.iter_mut()) {
        if !column.is_binary() {
            continue;
        }
        if let Some(text) = value.as_deref() {
            let bytes = encoding
                .decode(text)
                .with_context(|| format!("decoding binary column {}", column.name))?;
            *value = Some(BinaryEncoding::Hex.encode(&bytes));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictSetting, DetectionMethod, ResolutionPolicy};
    use crate::testing::MemoryPlatform;
    use sync_model::{Column, ColumnTypeCode};

    fn item_table() -> Table {
        Table::new(
            "item",
            vec![
                Column::primary_key("id", ColumnTypeCode::BigInt),
                Column::new("name", ColumnTypeCode::Varchar),
                Column::new("rev", ColumnTypeCode::Integer),
            ],
        )
    }

    fn writer_with(
        platform: &MemoryPlatform,
        settings: Vec<ConflictSetting>,
    ) -> DatabaseWriter {
        DatabaseWriter::new(Arc::new(platform.clone()), ConflictSettings::new(settings))
    }

    fn cells(values: &[Option<&str>]) -> Vec<Cell> {
        values.iter().map(|v| v.map(|s| s.to_string())).collect()
    }

    async fn begin(writer: &mut DatabaseWriter) {
        let batch = Batch::new(1, "default", "n1");
        writer.begin_batch(&batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_fallback_to_update() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());
        platform.seed_row("item", cells(&[Some("1"), Some("old"), Some("1")]));

        let mut writer = writer_with(&platform, vec![]);
        begin(&mut writer).await;
        let event = RowEvent::insert(cells(&[Some("1"), Some("new"), Some("2")]));
        let result = writer.load_event(&item_table(), &event).await.unwrap();
        assert!(matches!(result, LoadResult::Applied));

        let stats = writer.commit_batch().await.unwrap();
        assert_eq!(stats.fallback_update_count, 1);
        assert_eq!(stats.insert_count, 0);
        assert_eq!(
            platform.rows("item"),
            vec![cells(&[Some("1"), Some("new"), Some("2")])]
        );
        // failed insert + fallback update
        assert_eq!(platform.executed_statements().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_manual_conflict_runs_no_extra_dml() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());
        platform.seed_row("item", cells(&[Some("1"), Some("old"), Some("1")]));

        let mut setting = ConflictSetting::defaults();
        setting.insert_policy = ResolutionPolicy::Manual;
        let mut writer = writer_with(&platform, vec![setting]);
        begin(&mut writer).await;
        let event = RowEvent::insert(cells(&[Some("1"), Some("new"), Some("2")]));
        let result = writer.load_event(&item_table(), &event).await.unwrap();
        let LoadResult::Conflict(conflict) = result else {
            panic!("expected conflict");
        };
        assert_eq!(conflict.status, LoadStatus::PkViolation);
        assert_eq!(conflict.table, "item");
        // only the failed insert; no fallback was attempted
        assert_eq!(platform.executed_statements().len(), 1);
        writer.rollback_batch().await.unwrap();
        assert_eq!(
            platform.rows("item"),
            vec![cells(&[Some("1"), Some("old"), Some("1")])]
        );
    }

    #[tokio::test]
    async fn test_update_fallback_to_insert() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());

        let mut writer = writer_with(&platform, vec![]);
        begin(&mut writer).await;
        let event = RowEvent::update(
            cells(&[Some("7"), Some("ghost"), Some("1")]),
            cells(&[Some("7")]),
        );
        let result = writer.load_event(&item_table(), &event).await.unwrap();
        assert!(matches!(result, LoadResult::Applied));
        let stats = writer.commit_batch().await.unwrap();
        assert_eq!(stats.fallback_insert_count, 1);
        assert_eq!(
            platform.rows("item"),
            vec![cells(&[Some("7"), Some("ghost"), Some("1")])]
        );
    }

    #[tokio::test]
    async fn test_missing_delete_is_counted_and_skipped() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());

        let mut writer = writer_with(&platform, vec![]);
        begin(&mut writer).await;
        let event = RowEvent::delete(cells(&[Some("404")]));
        let result = writer.load_event(&item_table(), &event).await.unwrap();
        assert!(matches!(result, LoadResult::Skipped));
        let stats = writer.commit_batch().await.unwrap();
        assert_eq!(stats.missing_delete_count, 1);
        assert_eq!(stats.delete_count, 0);
    }

    #[tokio::test]
    async fn test_newer_wins_version_comparison() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());
        platform.seed_row("item", cells(&[Some("1"), Some("stored"), Some("5")]));

        let mut setting = ConflictSetting::defaults();
        setting.insert_policy = ResolutionPolicy::NewerWins;
        setting.detection = Some(DetectionMethod::Version("rev".to_string()));
        let mut writer = writer_with(&platform, vec![setting]);
        begin(&mut writer).await;

        // older incoming row loses
        let stale = RowEvent::insert(cells(&[Some("1"), Some("stale"), Some("4")]));
        let result = writer.load_event(&item_table(), &stale).await.unwrap();
        assert!(matches!(result, LoadResult::Skipped));
        assert_eq!(
            platform.rows("item"),
            vec![cells(&[Some("1"), Some("stored"), Some("5")])]
        );

        // newer incoming row wins and lands as an update
        let fresh = RowEvent::insert(cells(&[Some("1"), Some("fresh"), Some("6")]));
        let result = writer.load_event(&item_table(), &fresh).await.unwrap();
        assert!(matches!(result, LoadResult::Applied));
        let stats = writer.commit_batch().await.unwrap();
        assert_eq!(stats.ignore_count, 1);
        assert_eq!(stats.fallback_update_count, 1);
        assert_eq!(
            platform.rows("item"),
            vec![cells(&[Some("1"), Some("fresh"), Some("6")])]
        );
    }

    #[tokio::test]
    async fn test_sql_payload_and_script_without_engine() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());

        let mut writer = writer_with(&platform, vec![]);
        begin(&mut writer).await;
        let result = writer
            .load_event(&item_table(), &RowEvent::sql("vacuum item"))
            .await
            .unwrap();
        assert!(matches!(result, LoadResult::Applied));

        let result = writer
            .load_event(&item_table(), &RowEvent::script("rebuildIndexes()"))
            .await
            .unwrap();
        assert!(matches!(result, LoadResult::Skipped));

        let stats = writer.commit_batch().await.unwrap();
        assert_eq!(stats.sql_count, 1);
        assert_eq!(stats.ignore_count, 1);
        assert!(platform
            .executed_statements()
            .contains(&"vacuum item".to_string()));
    }

    #[tokio::test]
    async fn test_binary_cells_normalized_to_hex() {
        let table = Table::new(
            "doc",
            vec![
                Column::primary_key("id", ColumnTypeCode::BigInt),
                Column::new("body", ColumnTypeCode::Blob),
            ],
        );
        let platform = MemoryPlatform::new();
        platform.register_table(table.clone());

        let mut writer = writer_with(&platform, vec![]);
        let batch = Batch::new(9, "default", "n1").with_encoding(BinaryEncoding::Base64);
        writer.begin_batch(&batch).await.unwrap();
        let body = BinaryEncoding::Base64.encode(b"\x01\x02");
        let event = RowEvent::insert(cells(&[Some("1"), Some(&body)]));
        writer.load_event(&table, &event).await.unwrap();
        writer.commit_batch().await.unwrap();

        assert_eq!(
            platform.rows("doc"),
            vec![vec![Some("1".to_string()), Some("0102".to_string())]]
        );
    }

    #[tokio::test]
    async fn test_writer_is_not_reentrant() {
        let platform = MemoryPlatform::new();
        let mut writer = writer_with(&platform, vec![]);
        begin(&mut writer).await;
        let batch = Batch::new(2, "default", "n1");
        assert!(writer.begin_batch(&batch).await.is_err());
    }
}
