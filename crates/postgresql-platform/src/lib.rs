//! PostgreSQL implementation of the mesh-sync platform capability.
//!
//! Values cross the writer boundary as text cells, so every generated
//! placeholder carries an explicit cast to the column's declared type
//! (`$1::bigint`, `decode($2, 'hex')` for binary columns); PostgreSQL
//! parses the text at execution time. Works with PostgreSQL 9.5+.

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use sync_load::platform::{DbTransaction, DmlStatement, Platform, SqlError, SqlErrorKind};
use sync_model::event::Cell;
use sync_model::{Column, ColumnTypeCode, Table};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

/// [`Platform`] backed by one dedicated `tokio-postgres` connection.
///
/// One platform instance owns one connection; the writer's
/// one-batch-at-a-time discipline means the connection never sees
/// interleaved transactions.
pub struct PostgresPlatform {
    client: Arc<Client>,
}

impl PostgresPlatform {
    /// Connect and spawn the connection driver task.
    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .context("connecting to PostgreSQL")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection error: {e}");
            }
        });
        info!("PostgreSQL connection established for replication load");
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Wrap an already-connected client (e.g. one opened with TLS by
    /// the embedding application).
    pub fn from_client(client: Arc<Client>) -> Self {
        Self { client }
    }
}

fn classify(error: tokio_postgres::Error) -> SqlError {
    let (kind, state, message) = match error.as_db_error() {
        Some(db_error) => {
            let state = db_error.code().code().to_string();
            let kind = match state.as_str() {
                "23505" => SqlErrorKind::UniqueViolation,
                "23503" => SqlErrorKind::ForeignKeyViolation,
                "22001" => SqlErrorKind::DataTruncation,
                "40P01" | "40001" => SqlErrorKind::Deadlock,
                _ => SqlErrorKind::Other,
            };
            (kind, Some(state), db_error.message().to_string())
        }
        None => (SqlErrorKind::Other, None, error.to_string()),
    };
    SqlError {
        kind,
        code: None,
        state,
        message,
    }
}

/// Text-parameter cast for a column's declared type.
fn cast_for(column: &Column) -> Option<&'static str> {
    use ColumnTypeCode::*;
    match column.type_code {
        TinyInt | SmallInt | Integer | BigInt => Some("bigint"),
        Numeric | Decimal => Some("numeric"),
        Float | Real | Double => Some("float8"),
        Bit | Boolean => Some("boolean"),
        Date => Some("date"),
        Time => Some("time"),
        Timestamp => Some("timestamp"),
        _ => None,
    }
}

fn type_code_for(data_type: &str) -> ColumnTypeCode {
    match data_type {
        "smallint" => ColumnTypeCode::SmallInt,
        "integer" => ColumnTypeCode::Integer,
        "bigint" => ColumnTypeCode::BigInt,
        "numeric" => ColumnTypeCode::Numeric,
        "real" => ColumnTypeCode::Real,
        "double precision" => ColumnTypeCode::Double,
        "boolean" => ColumnTypeCode::Boolean,
        "date" => ColumnTypeCode::Date,
        "time without time zone" | "time with time zone" => ColumnTypeCode::Time,
        "timestamp without time zone" | "timestamp with time zone" => ColumnTypeCode::Timestamp,
        "bytea" => ColumnTypeCode::VarBinary,
        "character" => ColumnTypeCode::Char,
        "character varying" => ColumnTypeCode::Varchar,
        "text" => ColumnTypeCode::LongVarchar,
        _ => ColumnTypeCode::Other,
    }
}

#[async_trait]
impl Platform for PostgresPlatform {
    fn name(&self) -> &str {
        "postgresql"
    }

    async fn version(&self) -> Result<String, SqlError> {
        let row = self
            .client
            .query_one("show server_version", &[])
            .await
            .map_err(classify)?;
        Ok(row.get::<_, String>(0))
    }

    fn placeholder(&self, index: usize, column: &Column) -> String {
        if column.is_binary() {
            return format!("decode(${}, 'hex')", index + 1);
        }
        match cast_for(column) {
            Some(cast) => format!("${}::{}", index + 1, cast),
            None => format!("${}", index + 1),
        }
    }

    async fn table(
        &self,
        _catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
    ) -> Result<Option<Table>, SqlError> {
        let schema_name = schema.unwrap_or("public");
        let columns = self
            .client
            .query(
                "select column_name, data_type
                 from information_schema.columns
                 where table_schema = $1 and table_name = $2
                 order by ordinal_position",
                &[&schema_name, &name],
            )
            .await
            .map_err(classify)?;
        if columns.is_empty() {
            return Ok(None);
        }
        let keys = self
            .client
            .query(
                "select kcu.column_name
                 from information_schema.table_constraints tc
                 join information_schema.key_column_usage kcu
                   on kcu.constraint_name = tc.constraint_name
                  and kcu.table_schema = tc.table_schema
                 where tc.constraint_type = 'PRIMARY KEY'
                   and tc.table_schema = $1 and tc.table_name = $2
                 order by kcu.ordinal_position",
                &[&schema_name, &name],
            )
            .await
            .map_err(classify)?;
        let key_names: Vec<String> = keys.iter().map(|row| row.get(0)).collect();

        let mut table = Table::qualified(
            None,
            schema.map(|s| s.to_string()),
            name,
            columns
                .iter()
                .map(|row| {
                    let column_name: String = row.get(0);
                    let data_type: String = row.get(1);
                    Column::new(column_name, type_code_for(&data_type))
                })
                .collect(),
        );
        table.set_primary_keys(&key_names);
        Ok(Some(table))
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, SqlError> {
        self.client.execute("begin", &[]).await.map_err(classify)?;
        Ok(Box::new(PostgresTransaction {
            client: self.client.clone(),
        }))
    }
}

/// Transaction over the platform's dedicated connection, driven with
/// explicit `begin`/`commit`/`rollback` statements.
struct PostgresTransaction {
    client: Arc<Client>,
}

fn text_params(values: &[Cell]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl DbTransaction for PostgresTransaction {
    async fn execute(
        &mut self,
        statement: &DmlStatement,
        values: &[Cell],
    ) -> Result<u64, SqlError> {
        debug!(sql = statement.sql.as_str(), "executing replication dml");
        self.client
            .execute(&statement.sql, &text_params(values))
            .await
            .map_err(classify)
    }

    async fn query_scalar(
        &mut self,
        table: &Table,
        column: &Column,
        key_columns: &[Column],
        key_values: &[Cell],
    ) -> Result<Option<Cell>, SqlError> {
        let qualified = {
            let mut parts = Vec::new();
            if let Some(schema) = &table.schema {
                parts.push(format!("\"{schema}\""));
            }
            parts.push(format!("\"{}\"", table.name));
            parts.join(".")
        };
        let wheres: Vec<String> = key_columns
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let placeholder = match cast_for(key) {
                    Some(cast) => format!("${}::{}", i + 1, cast),
                    None => format!("${}", i + 1),
                };
                format!("\"{}\" = {placeholder}", key.name)
            })
            .collect();
        let sql = format!(
            "select \"{}\"::text from {} where {}",
            column.name,
            qualified,
            wheres.join(" and ")
        );
        let row = self
            .client
            .query_opt(&sql, &text_params(key_values))
            .await
            .map_err(classify)?;
        Ok(row.map(|r| r.get::<_, Option<String>>(0)))
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<u64, SqlError> {
        self.client.execute(sql, &[]).await.map_err(classify)
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlError> {
        self.client.execute("commit", &[]).await.map_err(classify)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlError> {
        self.client
            .execute("rollback", &[])
            .await
            .map_err(classify)?;
        Ok(())
    }
}
