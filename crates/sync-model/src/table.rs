//! Schema metadata for replicated tables.
//!
//! [`Table`] and [`Column`] describe the shape of one relational table as
//! seen by the replication engine. Column order is semantically
//! significant: row values travel positionally on the wire, so the
//! ordinal position of a column is part of the contract, not an
//! implementation detail.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JDBC-style type code for a column.
///
/// The replication core only needs enough type information to decide how
/// to move a value (text vs binary) and how to compare it for
/// newer-wins conflict detection; vendor platforms map these onto their
/// native types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnTypeCode {
    Char,
    Varchar,
    LongVarchar,
    Clob,
    Numeric,
    Decimal,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Bit,
    Boolean,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Other,
}

impl ColumnTypeCode {
    /// True for types whose values are transported under the batch's
    /// declared binary encoding rather than as plain text.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Binary | Self::VarBinary | Self::LongVarBinary | Self::Blob
        )
    }

    /// True for types an UPDATE comparison may treat as numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Numeric
                | Self::Decimal
                | Self::TinyInt
                | Self::SmallInt
                | Self::Integer
                | Self::BigInt
                | Self::Float
                | Self::Real
                | Self::Double
        )
    }

    /// True for date/time types.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Time | Self::Timestamp)
    }
}

/// Per-dialect overrides for one column.
///
/// A vendor platform may need a different column name, size, or default
/// than the canonical definition (e.g. reserved words, size limits).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformColumn {
    /// Override for the column name under this dialect
    pub name: Option<String>,
    /// Override for the declared size
    pub size: Option<u32>,
    /// Override for the default value expression
    pub default_value: Option<String>,
}

/// One column of a replicated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as declared on the source
    pub name: String,
    /// Whether this column is part of the primary key
    pub primary_key: bool,
    /// JDBC-style type code
    pub type_code: ColumnTypeCode,
    /// Declared size/precision, if any
    pub size: Option<u32>,
    /// Declared scale, if any
    pub scale: Option<u32>,
    /// Dialect name -> overrides applied by that vendor platform
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub platform_overrides: HashMap<String, PlatformColumn>,
}

impl Column {
    /// Create a non-key column of the given type.
    pub fn new(name: impl Into<String>, type_code: ColumnTypeCode) -> Self {
        Self {
            name: name.into(),
            primary_key: false,
            type_code,
            size: None,
            scale: None,
            platform_overrides: HashMap::new(),
        }
    }

    /// Create a primary-key column of the given type.
    pub fn primary_key(name: impl Into<String>, type_code: ColumnTypeCode) -> Self {
        let mut column = Self::new(name, type_code);
        column.primary_key = true;
        column
    }

    /// Set the declared size (builder style).
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the declared scale (builder style).
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Register per-dialect overrides for this column.
    pub fn with_platform_override(
        mut self,
        dialect: impl Into<String>,
        overrides: PlatformColumn,
    ) -> Self {
        self.platform_overrides.insert(dialect.into(), overrides);
        self
    }

    /// The effective column name under the given dialect.
    pub fn name_for_dialect(&self, dialect: &str) -> &str {
        self.platform_overrides
            .get(dialect)
            .and_then(|o| o.name.as_deref())
            .unwrap_or(&self.name)
    }

    /// Whether values of this column travel under the batch binary encoding.
    pub fn is_binary(&self) -> bool {
        self.type_code.is_binary()
    }
}

/// Schema metadata for one replicated table.
///
/// Identity is the fully-qualified name (`catalog.schema.table`).
/// Instances are built fresh from a protocol table-definition record or
/// looked up from a per-session cache keyed by [`Table::qualified_name`],
/// and are treated as immutable once associated with a change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Optional catalog qualifier
    pub catalog: Option<String>,
    /// Optional schema qualifier
    pub schema: Option<String>,
    /// Table name
    pub name: String,
    /// Ordered columns; ordinal position matches wire position
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a table without catalog/schema qualifiers.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: name.into(),
            columns,
        }
    }

    /// Create a fully-qualified table.
    pub fn qualified(
        catalog: Option<String>,
        schema: Option<String>,
        name: impl Into<String>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            catalog,
            schema,
            name: name.into(),
            columns,
        }
    }

    /// Fully-qualified name, absent qualifiers elided.
    ///
    /// This is the cache identity used by the protocol reader/writer and
    /// the column-mapping cache.
    pub fn qualified_name(&self) -> String {
        match (&self.catalog, &self.schema) {
            (Some(c), Some(s)) => format!("{c}.{s}.{}", self.name),
            (Some(c), None) => format!("{c}.{}", self.name),
            (None, Some(s)) => format!("{s}.{}", self.name),
            (None, None) => self.name.clone(),
        }
    }

    /// Ordinal of the named column, case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The named column, case-insensitive.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Column names in wire order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary-key columns in declared order.
    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Names of the primary-key columns in declared order.
    pub fn primary_key_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Whether the table declares any primary-key column.
    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }

    /// Flag the named columns as the primary key, case-insensitive.
    ///
    /// Used by the protocol reader when a `keys` record precedes the
    /// `columns` record that finalizes the definition. Names that match
    /// no column are ignored; the wire lists keys as a subset of the
    /// upcoming column names, so a mismatch means the peer sent a key
    /// for a column it never declared.
    pub fn set_primary_keys(&mut self, names: &[String]) {
        for column in &mut self.columns {
            column.primary_key = names.iter().any(|n| n.eq_ignore_ascii_case(&column.name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table::new(
            "customer",
            vec![
                Column::primary_key("id", ColumnTypeCode::BigInt),
                Column::new("name", ColumnTypeCode::Varchar).with_size(120),
                Column::new("photo", ColumnTypeCode::Blob),
            ],
        )
    }

    #[test]
    fn test_qualified_name_forms() {
        let mut t = sample_table();
        assert_eq!(t.qualified_name(), "customer");

        t.schema = Some("crm".to_string());
        assert_eq!(t.qualified_name(), "crm.customer");

        t.catalog = Some("corp".to_string());
        assert_eq!(t.qualified_name(), "corp.crm.customer");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let t = sample_table();
        assert_eq!(t.column_index("NAME"), Some(1));
        assert_eq!(t.column_index("Id"), Some(0));
        assert_eq!(t.column_index("missing"), None);
    }

    #[test]
    fn test_primary_key_flags() {
        let mut t = sample_table();
        assert_eq!(t.primary_key_names(), vec!["id"]);

        t.set_primary_keys(&["NAME".to_string()]);
        assert_eq!(t.primary_key_names(), vec!["name"]);
        assert!(!t.columns[0].primary_key);
    }

    #[test]
    fn test_binary_classification() {
        let t = sample_table();
        assert!(t.column("photo").unwrap().is_binary());
        assert!(!t.column("name").unwrap().is_binary());
    }

    #[test]
    fn test_dialect_override() {
        let column = Column::new("order", ColumnTypeCode::Varchar).with_platform_override(
            "postgresql",
            PlatformColumn {
                name: Some("order_".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(column.name_for_dialect("postgresql"), "order_");
        assert_eq!(column.name_for_dialect("mysql"), "order");
    }
}
