//! In-memory fakes for tests: a [`Platform`] backed by hash maps and a
//! batch store backed by a counter per source node.
//!
//! These ship in the library (not behind `cfg(test)`) so downstream
//! crates and integration tests can drive the writer and load service
//! without a database.

use crate::batch_store::IncomingBatchStore;
use crate::platform::{
    effective_keys, DbTransaction, DmlStatement, DmlType, Platform, SqlError, SqlErrorKind,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sync_model::event::Cell;
use sync_model::Table;

#[derive(Default)]
struct MemoryDb {
    tables: HashMap<String, StoredTable>,
    executed: Vec<String>,
}

#[derive(Clone)]
struct StoredTable {
    definition: Table,
    rows: Vec<HashMap<String, Cell>>,
}

/// An in-memory [`Platform`] with real unique-key and affected-row
/// semantics, enough to exercise the writer's conflict paths.
#[derive(Default, Clone)]
pub struct MemoryPlatform {
    db: Arc<Mutex<MemoryDb>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a table the platform will report through [`Platform::table`].
    pub fn register_table(&self, definition: Table) {
        let mut db = self.db.lock().unwrap();
        db.tables.insert(
            definition.qualified_name(),
            StoredTable {
                definition,
                rows: Vec::new(),
            },
        );
    }

    /// Insert a row directly, bypassing the writer (test seeding).
    pub fn seed_row(&self, qualified_name: &str, values: Vec<Cell>) {
        let mut db = self.db.lock().unwrap();
        let stored = db
            .tables
            .get_mut(qualified_name)
            .unwrap_or_else(|| panic!("table {qualified_name} not registered"));
        let row = stored
            .definition
            .columns
            .iter()
            .zip(values)
            .map(|(c, v)| (c.name.to_lowercase(), v))
            .collect();
        stored.rows.push(row);
    }

    /// Positional snapshot of a table's rows, in insertion order.
    pub fn rows(&self, qualified_name: &str) -> Vec<Vec<Cell>> {
        let db = self.db.lock().unwrap();
        let stored = match db.tables.get(qualified_name) {
            Some(stored) => stored,
            None => return Vec::new(),
        };
        stored
            .rows
            .iter()
            .map(|row| {
                stored
                    .definition
                    .columns
                    .iter()
                    .map(|c| row.get(&c.name.to_lowercase()).cloned().flatten())
                    .collect()
            })
            .collect()
    }

    /// Every statement executed, in order (DML and raw SQL).
    pub fn executed_statements(&self) -> Vec<String> {
        self.db.lock().unwrap().executed.clone()
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    async fn version(&self) -> Result<String, SqlError> {
        Ok("0".to_string())
    }

    async fn table(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
    ) -> Result<Option<Table>, SqlError> {
        let qualified = match (catalog, schema) {
            (Some(c), Some(s)) => format!("{c}.{s}.{name}"),
            (Some(c), None) => format!("{c}.{name}"),
            (None, Some(s)) => format!("{s}.{name}"),
            (None, None) => name.to_string(),
        };
        let db = self.db.lock().unwrap();
        Ok(db.tables.get(&qualified).map(|t| t.definition.clone()))
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, SqlError> {
        let snapshot = self.db.lock().unwrap().tables.clone();
        Ok(Box::new(MemoryTransaction {
            db: self.db.clone(),
            snapshot: Some(snapshot),
        }))
    }
}

/// Transaction over [`MemoryPlatform`]: mutations apply immediately and
/// a begin-time snapshot is restored on rollback.
struct MemoryTransaction {
    db: Arc<Mutex<MemoryDb>>,
    snapshot: Option<HashMap<String, StoredTable>>,
}

impl MemoryTransaction {
    fn key_of(row: &HashMap<String, Cell>, key_names: &[String]) -> Vec<Cell> {
        key_names.iter().map(|k| row.get(k).cloned().flatten()).collect()
    }
}

#[async_trait]
impl DbTransaction for MemoryTransaction {
    async fn execute(
        &mut self,
        statement: &DmlStatement,
        values: &[Cell],
    ) -> Result<u64, SqlError> {
        let mut db = self.db.lock().unwrap();
        db.executed
            .push(format!("{} {:?}", statement.sql, values));
        let stored = db
            .tables
            .get_mut(&statement.table)
            .ok_or_else(|| SqlError::new(SqlErrorKind::Other, format!("no table {}", statement.table)))?;
        let key_names: Vec<String> = statement
            .key_columns
            .iter()
            .map(|c| c.name.to_lowercase())
            .collect();

        match statement.dml_type {
            DmlType::Insert => {
                let row: HashMap<String, Cell> = statement
                    .columns
                    .iter()
                    .zip(values.iter())
                    .map(|(c, v)| (c.name.to_lowercase(), v.clone()))
                    .collect();
                let unique_names: Vec<String> = effective_keys(&stored.definition)
                    .iter()
                    .map(|c| c.name.to_lowercase())
                    .collect();
                let new_key = Self::key_of(&row, &unique_names);
                if stored
                    .rows
                    .iter()
                    .any(|existing| Self::key_of(existing, &unique_names) == new_key)
                {
                    return Err(SqlError::new(
                        SqlErrorKind::UniqueViolation,
                        format!("duplicate key {new_key:?} in {}", statement.table),
                    )
                    .with_state("23505"));
                }
                stored.rows.push(row);
                Ok(1)
            }
            DmlType::Update => {
                let set_values = &values[..statement.columns.len()];
                let key_values: Vec<Cell> = values[statement.columns.len()..].to_vec();
                let mut affected = 0;
                for row in stored.rows.iter_mut() {
                    if Self::key_of(row, &key_names) == key_values {
                        for (column, value) in statement.columns.iter().zip(set_values.iter()) {
                            row.insert(column.name.to_lowercase(), value.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            DmlType::Delete => {
                let key_values: Vec<Cell> = values.to_vec();
                let before = stored.rows.len();
                stored
                    .rows
                    .retain(|row| Self::key_of(row, &key_names) != key_values);
                Ok((before - stored.rows.len()) as u64)
            }
        }
    }

    async fn query_scalar(
        &mut self,
        table: &Table,
        column: &sync_model::Column,
        key_columns: &[sync_model::Column],
        key_values: &[Cell],
    ) -> Result<Option<Cell>, SqlError> {
        let db = self.db.lock().unwrap();
        let stored = db
            .tables
            .get(&table.qualified_name())
            .ok_or_else(|| SqlError::new(SqlErrorKind::Other, "no such table"))?;
        let key_names: Vec<String> = key_columns.iter().map(|c| c.name.to_lowercase()).collect();
        let row = stored
            .rows
            .iter()
            .find(|row| Self::key_of(row, &key_names) == key_values);
        Ok(row.map(|r| r.get(&column.name.to_lowercase()).cloned().flatten()))
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<u64, SqlError> {
        self.db.lock().unwrap().executed.push(sql.to_string());
        Ok(0)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), SqlError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), SqlError> {
        if let Some(snapshot) = self.snapshot.take() {
            self.db.lock().unwrap().tables = snapshot;
        }
        Ok(())
    }
}

/// In-memory [`IncomingBatchStore`] tracking the highest committed
/// batch id per source node.
#[derive(Default, Clone)]
pub struct MemoryBatchStore {
    committed: Arc<Mutex<HashMap<String, i64>>>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncomingBatchStore for MemoryBatchStore {
    async fn is_committed(&self, source_node_id: &str, batch_id: i64) -> anyhow::Result<bool> {
        let committed = self.committed.lock().unwrap();
        Ok(committed
            .get(source_node_id)
            .is_some_and(|highest| batch_id <= *highest))
    }

    async fn mark_committed(&self, source_node_id: &str, batch_id: i64) -> anyhow::Result<()> {
        let mut committed = self.committed.lock().unwrap();
        let entry = committed.entry(source_node_id.to_string()).or_insert(i64::MIN);
        if batch_id > *entry {
            *entry = batch_id;
        }
        Ok(())
    }

    async fn highest_committed(&self, source_node_id: &str) -> anyhow::Result<Option<i64>> {
        Ok(self.committed.lock().unwrap().get(source_node_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_model::{Column, ColumnTypeCode};

    fn item_table() -> Table {
        Table::new(
            "item",
            vec![
                Column::primary_key("id", ColumnTypeCode::BigInt),
                Column::new("name", ColumnTypeCode::Varchar),
            ],
        )
    }

    #[tokio::test]
    async fn test_unique_violation_and_rollback() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());
        let insert = platform.build_insert(&item_table());

        let mut tx = platform.begin().await.unwrap();
        tx.execute(&insert, &[Some("1".into()), Some("a".into())])
            .await
            .unwrap();
        let err = tx
            .execute(&insert, &[Some("1".into()), Some("b".into())])
            .await
            .unwrap_err();
        assert_eq!(err.kind, SqlErrorKind::UniqueViolation);
        assert_eq!(err.state.as_deref(), Some("23505"));

        tx.rollback().await.unwrap();
        assert!(platform.rows("item").is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_affected_rows() {
        let platform = MemoryPlatform::new();
        platform.register_table(item_table());
        platform.seed_row("item", vec![Some("1".into()), Some("a".into())]);

        let update = platform.build_update(&item_table(), &[Column::new("name", ColumnTypeCode::Varchar)]);
        let delete = platform.build_delete(&item_table());
        let mut tx = platform.begin().await.unwrap();
        assert_eq!(
            tx.execute(&update, &[Some("z".into()), Some("1".into())])
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            tx.execute(&update, &[Some("z".into()), Some("404".into())])
                .await
                .unwrap(),
            0
        );
        assert_eq!(tx.execute(&delete, &[Some("1".into())]).await.unwrap(), 1);
        tx.commit().await.unwrap();
        assert!(platform.rows("item").is_empty());
    }

    #[tokio::test]
    async fn test_batch_store_monotonic() {
        let store = MemoryBatchStore::new();
        assert!(!store.is_committed("n1", 5).await.unwrap());
        store.mark_committed("n1", 5).await.unwrap();
        assert!(store.is_committed("n1", 5).await.unwrap());
        assert!(store.is_committed("n1", 4).await.unwrap());
        assert!(!store.is_committed("n1", 6).await.unwrap());
        assert!(!store.is_committed("n2", 5).await.unwrap());
        assert_eq!(store.highest_committed("n1").await.unwrap(), Some(5));
    }
}
