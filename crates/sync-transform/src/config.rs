//! Declarative transform configuration.
//!
//! Configuration is loaded once per session and treated as read-only
//! during processing; the pipeline only ever borrows it.

use serde::{Deserialize, Serialize};

/// Where in the data flow a transform applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformPoint {
    /// While extracting changes on the source side, before they hit the wire
    Extract,
    /// While loading changes on the target side
    Load,
}

/// What a source DELETE becomes on the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteAction {
    /// Delete the target row
    #[default]
    DelRow,
    /// Update the target row instead (soft delete)
    UpdateCol,
    /// Suppress the event entirely
    None,
}

/// One declared column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformColumn {
    /// Source column the function reads, when it reads one
    pub source_name: Option<String>,
    /// Target column the produced value lands in
    pub target_name: String,
    /// Whether the target column is part of the target primary key
    pub pk: bool,
    /// Registry key of the transform function
    pub transform_type: String,
    /// Function-specific argument (constant text, substring bounds,
    /// lookup map, script body)
    pub expression: Option<String>,
}

impl TransformColumn {
    /// A plain copy column.
    pub fn copy(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_name: Some(source.into()),
            target_name: target.into(),
            pk: false,
            transform_type: "copy".to_string(),
            expression: None,
        }
    }

    /// Mark as a primary-key column (builder style).
    pub fn as_pk(mut self) -> Self {
        self.pk = true;
        self
    }

    /// Set the transform function (builder style).
    pub fn with_transform(mut self, transform_type: impl Into<String>) -> Self {
        self.transform_type = transform_type.into();
        self
    }

    /// Set the function argument (builder style).
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

/// Declarative mapping from one source table to one target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformTable {
    /// Source table qualifiers
    pub source_catalog: Option<String>,
    pub source_schema: Option<String>,
    pub source_table: String,
    /// Target table qualifiers
    pub target_catalog: Option<String>,
    pub target_schema: Option<String>,
    pub target_table: String,
    /// Where this transform applies
    pub point: TransformPoint,
    /// What a source DELETE becomes
    #[serde(default)]
    pub delete_action: DeleteAction,
    /// Demote INSERT to UPDATE (for targets where the row is expected
    /// to exist already)
    #[serde(default)]
    pub update_first: bool,
    /// Column mappings; pk columns are evaluated first, in declared order
    pub columns: Vec<TransformColumn>,
}

impl TransformTable {
    /// A same-name transform between two flat tables.
    pub fn new(
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        point: TransformPoint,
        columns: Vec<TransformColumn>,
    ) -> Self {
        Self {
            source_catalog: None,
            source_schema: None,
            source_table: source_table.into(),
            target_catalog: None,
            target_schema: None,
            target_table: target_table.into(),
            point,
            delete_action: DeleteAction::default(),
            update_first: false,
            columns,
        }
    }

    /// Fully-qualified source name, matching [`sync_model::Table::qualified_name`].
    pub fn source_qualified_name(&self) -> String {
        qualified(
            self.source_catalog.as_deref(),
            self.source_schema.as_deref(),
            &self.source_table,
        )
    }

    /// Primary-key transform columns in declared order.
    pub fn pk_columns(&self) -> impl Iterator<Item = &TransformColumn> {
        self.columns.iter().filter(|c| c.pk)
    }

    /// Non-key transform columns in declared order.
    pub fn value_columns(&self) -> impl Iterator<Item = &TransformColumn> {
        self.columns.iter().filter(|c| !c.pk)
    }

    /// Set the delete action (builder style).
    pub fn with_delete_action(mut self, action: DeleteAction) -> Self {
        self.delete_action = action;
        self
    }

    /// Demote inserts to updates (builder style).
    pub fn with_update_first(mut self) -> Self {
        self.update_first = true;
        self
    }
}

fn qualified(catalog: Option<&str>, schema: Option<&str>, name: &str) -> String {
    match (catalog, schema) {
        (Some(c), Some(s)) => format!("{c}.{s}.{name}"),
        (Some(c), None) => format!("{c}.{name}"),
        (None, Some(s)) => format!("{s}.{name}"),
        (None, None) => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_source_name() {
        let mut tt = TransformTable::new("orders", "order_history", TransformPoint::Load, vec![]);
        assert_eq!(tt.source_qualified_name(), "orders");
        tt.source_schema = Some("sales".to_string());
        assert_eq!(tt.source_qualified_name(), "sales.orders");
    }

    #[test]
    fn test_column_partitioning() {
        let tt = TransformTable::new(
            "orders",
            "order_history",
            TransformPoint::Load,
            vec![
                TransformColumn::copy("id", "order_id").as_pk(),
                TransformColumn::copy("total", "total"),
            ],
        );
        assert_eq!(tt.pk_columns().count(), 1);
        assert_eq!(tt.value_columns().count(), 1);
    }
}
