//! The database platform capability.
//!
//! A [`Platform`] is one vendor's implementation of the handful of
//! operations the replication core needs: build parameterized DML for a
//! table and key set, execute it inside a transaction, classify vendor
//! errors into the shapes conflict resolution understands, and report
//! dialect identity. Vendors differ in data (placeholder syntax,
//! quoting, type mapping), not in algorithm, so each implementation is
//! configuration over the shared statement builders below rather than
//! an inheritance tree.

use async_trait::async_trait;
use sync_model::event::Cell;
use sync_model::{Column, Table};
use thiserror::Error;

/// Vendor-neutral classification of a database error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    /// Primary-key or unique-constraint violation
    UniqueViolation,
    /// Foreign-key violation
    ForeignKeyViolation,
    /// Value too long / out of range
    DataTruncation,
    /// Deadlock or serialization failure, retriable by the caller
    Deadlock,
    /// Anything else
    Other,
}

/// A classified database error.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} (state={state:?}, code={code:?}): {message}")]
pub struct SqlError {
    pub kind: SqlErrorKind,
    /// Vendor error code, when available
    pub code: Option<i32>,
    /// SQLSTATE, when available
    pub state: Option<String>,
    pub message: String,
}

impl SqlError {
    pub fn new(kind: SqlErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            state: None,
            message: message.into(),
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn is_unique_violation(&self) -> bool {
        self.kind == SqlErrorKind::UniqueViolation
    }
}

/// The kind of DML a statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlType {
    Insert,
    Update,
    Delete,
}

/// A parameterized statement plus the metadata needed to bind it.
///
/// `columns` then `key_columns` is the bind order: INSERT binds all
/// target columns; UPDATE binds the non-key SET columns followed by the
/// key WHERE columns; DELETE binds only the key columns. Carrying the
/// structure alongside the SQL text lets non-SQL backends (the in-memory
/// test platform) execute statements without parsing the text.
#[derive(Debug, Clone)]
pub struct DmlStatement {
    pub dml_type: DmlType,
    /// Vendor SQL text with placeholders
    pub sql: String,
    /// Qualified target table name
    pub table: String,
    /// Value columns in bind order
    pub columns: Vec<Column>,
    /// Key columns in bind order (empty for INSERT)
    pub key_columns: Vec<Column>,
}

impl DmlStatement {
    /// Total number of bind parameters.
    pub fn bind_count(&self) -> usize {
        self.columns.len() + self.key_columns.len()
    }
}

/// One vendor's database capability.
///
/// The statement builders have shared default implementations driven by
/// [`Platform::quote`] and [`Platform::placeholder`]; a vendor overrides
/// those two (and error classification inside its [`DbTransaction`])
/// rather than the builders themselves.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Dialect name, e.g. "postgresql".
    fn name(&self) -> &str;

    /// Server version string.
    async fn version(&self) -> Result<String, SqlError>;

    /// Quote an identifier.
    fn quote(&self, identifier: &str) -> String {
        format!("\"{identifier}\"")
    }

    /// Placeholder for the 0-based bind index.
    fn placeholder(&self, index: usize, _column: &Column) -> String {
        format!("${}", index + 1)
    }

    /// Read the live definition of a table, if it exists. Target-side
    /// column metadata is authoritative for column mapping.
    async fn table(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
    ) -> Result<Option<Table>, SqlError>;

    /// Open a transaction; one batch runs entirely inside one
    /// transaction.
    async fn begin(&self) -> Result<Box<dyn DbTransaction>, SqlError>;

    /// Build `INSERT INTO t (c1..cn) VALUES (p1..pn)` over all columns.
    fn build_insert(&self, table: &Table) -> DmlStatement {
        let names: Vec<String> = table.columns.iter().map(|c| self.quote(&c.name)).collect();
        let placeholders: Vec<String> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| self.placeholder(i, c))
            .collect();
        DmlStatement {
            dml_type: DmlType::Insert,
            sql: format!(
                "insert into {} ({}) values ({})",
                self.qualified(table),
                names.join(", "),
                placeholders.join(", ")
            ),
            table: table.qualified_name(),
            columns: table.columns.clone(),
            key_columns: Vec::new(),
        }
    }

    /// Build `UPDATE t SET <set_columns> WHERE <key>`; falls back to
    /// all columns as the key for keyless tables.
    ///
    /// Only the columns the incoming event actually provides belong in
    /// the SET list; setting every non-key target column would null out
    /// columns the source never mapped (partial-column transforms).
    fn build_update(&self, table: &Table, set_columns: &[Column]) -> DmlStatement {
        let key_columns = effective_keys(table);
        let value_columns: Vec<Column> = set_columns.to_vec();
        let mut index = 0;
        let sets: Vec<String> = value_columns
            .iter()
            .map(|c| {
                let clause = format!("{} = {}", self.quote(&c.name), self.placeholder(index, c));
                index += 1;
                clause
            })
            .collect();
        let wheres: Vec<String> = key_columns
            .iter()
            .map(|c| {
                let clause = format!("{} = {}", self.quote(&c.name), self.placeholder(index, c));
                index += 1;
                clause
            })
            .collect();
        DmlStatement {
            dml_type: DmlType::Update,
            sql: format!(
                "update {} set {} where {}",
                self.qualified(table),
                sets.join(", "),
                wheres.join(" and ")
            ),
            table: table.qualified_name(),
            columns: value_columns,
            key_columns,
        }
    }

    /// Build `DELETE FROM t WHERE <key>`.
    fn build_delete(&self, table: &Table) -> DmlStatement {
        let key_columns = effective_keys(table);
        let wheres: Vec<String> = key_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote(&c.name), self.placeholder(i, c)))
            .collect();
        DmlStatement {
            dml_type: DmlType::Delete,
            sql: format!(
                "delete from {} where {}",
                self.qualified(table),
                wheres.join(" and ")
            ),
            table: table.qualified_name(),
            columns: Vec::new(),
            key_columns,
        }
    }

    /// Qualified, quoted table reference.
    fn qualified(&self, table: &Table) -> String {
        let mut parts = Vec::new();
        if let Some(catalog) = &table.catalog {
            parts.push(self.quote(catalog));
        }
        if let Some(schema) = &table.schema {
            parts.push(self.quote(schema));
        }
        parts.push(self.quote(&table.name));
        parts.join(".")
    }
}

/// Primary-key columns, or every column for keyless tables (the whole
/// row locates itself).
pub fn effective_keys(table: &Table) -> Vec<Column> {
    let keys: Vec<Column> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .cloned()
        .collect();
    if keys.is_empty() {
        table.columns.clone()
    } else {
        keys
    }
}

/// One in-flight database transaction.
///
/// The writer keeps exactly one open per batch; conflict-resolution
/// probes run inside it so the whole batch stays atomic.
#[async_trait]
pub trait DbTransaction: Send {
    /// Execute a built DML statement, returning the affected-row count.
    async fn execute(
        &mut self,
        statement: &DmlStatement,
        values: &[Cell],
    ) -> Result<u64, SqlError>;

    /// Point-select one column by key; `Ok(None)` when the row does not
    /// exist, `Ok(Some(cell))` with the (possibly NULL) value when it
    /// does. Used by newer-wins comparison.
    async fn query_scalar(
        &mut self,
        table: &Table,
        column: &Column,
        key_columns: &[Column],
        key_values: &[Cell],
    ) -> Result<Option<Cell>, SqlError>;

    /// Execute an opaque SQL payload.
    async fn execute_raw(&mut self, sql: &str) -> Result<u64, SqlError>;

    /// Commit the batch.
    async fn commit(self: Box<Self>) -> Result<(), SqlError>;

    /// Roll the batch back.
    async fn rollback(self: Box<Self>) -> Result<(), SqlError>;
}
