//! Shared builders for tests.

use chrono::Utc;
use sync_model::event::Cell;
use sync_model::{Column, ColumnTypeCode, EventType, Table};
use sync_route::ChangeRow;

/// A flat table with the named columns, the first `key_count` of which
/// are the primary key.
pub fn table(name: &str, columns: &[&str], key_count: usize) -> Table {
    Table::new(
        name,
        columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                if i < key_count {
                    Column::primary_key(*column, ColumnTypeCode::Other)
                } else {
                    Column::new(*column, ColumnTypeCode::Other)
                }
            })
            .collect(),
    )
}

/// Text cells from optional string literals.
pub fn cells(values: &[Option<&str>]) -> Vec<Cell> {
    values.iter().map(|v| v.map(|s| s.to_string())).collect()
}

/// A captured change row for routing tests.
#[allow(clippy::too_many_arguments)]
pub fn change_row(
    data_id: i64,
    transaction_id: Option<&str>,
    trigger_id: &str,
    channel_id: &str,
    table: &Table,
    event_type: EventType,
    row_data: Option<Vec<Cell>>,
    pk_data: Option<Vec<Cell>>,
) -> ChangeRow {
    ChangeRow {
        data_id,
        transaction_id: transaction_id.map(|t| t.to_string()),
        trigger_id: trigger_id.to_string(),
        channel_id: channel_id.to_string(),
        catalog: table.catalog.clone(),
        schema: table.schema.clone(),
        table: table.name.clone(),
        column_names: table.column_names().iter().map(|c| c.to_string()).collect(),
        pk_column_names: table
            .primary_key_names()
            .iter()
            .map(|c| c.to_string())
            .collect(),
        event_type,
        row_data,
        old_data: None,
        pk_data,
        create_time: Utc::now(),
    }
}
