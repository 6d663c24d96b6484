//! Row-level change events.
//!
//! A [`RowEvent`] is one captured change: an insert, update, or delete of
//! a single row, or an opaque payload event (raw SQL, DDL, script).
//! Values are always carried as text cells; `None` is SQL NULL. Cell
//! order matches the owning table's column order.

use crate::ModelError;
use serde::{Deserialize, Serialize};

/// The closed set of change-event types moved by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
    /// Opaque SQL statement to execute verbatim
    Sql,
    /// Opaque DDL payload
    Create,
    /// Script payload executed by an injected script engine
    Script,
}

impl EventType {
    /// The wire keyword for this event type.
    pub fn as_token(&self) -> &'static str {
        match self {
            EventType::Insert => "insert",
            EventType::Update => "update",
            EventType::Delete => "delete",
            EventType::Sql => "sql",
            EventType::Create => "create",
            EventType::Script => "bsh",
        }
    }

    /// Parse a wire keyword.
    pub fn from_token(token: &str) -> Result<Self, ModelError> {
        match token {
            "insert" => Ok(EventType::Insert),
            "update" => Ok(EventType::Update),
            "delete" => Ok(EventType::Delete),
            "sql" => Ok(EventType::Sql),
            "create" => Ok(EventType::Create),
            "bsh" => Ok(EventType::Script),
            other => Err(ModelError::UnknownEventType(other.to_string())),
        }
    }

    /// True for the DML event types that carry positional row cells.
    pub fn is_dml(&self) -> bool {
        matches!(self, EventType::Insert | EventType::Update | EventType::Delete)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// One text cell of a row; `None` is SQL NULL.
pub type Cell = Option<String>;

/// One row-level change event.
///
/// Up to three positional value roles:
/// - `row_data`: new/current values (insert, update)
/// - `old_data`: before values (update, delete), present only when the
///   capture configuration records them
/// - `pk_data`: primary-key values locating the target row when they
///   differ from `row_data` (e.g. an UPDATE that changes a key column)
///
/// For `Sql`/`Create`/`Script` events the payload is the single cell of
/// `row_data` and is not validated against table columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEvent {
    /// What happened to the row
    pub event_type: EventType,
    /// New/current values in column order
    pub row_data: Option<Vec<Cell>>,
    /// Before values in column order
    pub old_data: Option<Vec<Cell>>,
    /// Primary-key values in key order
    pub pk_data: Option<Vec<Cell>>,
}

impl RowEvent {
    /// An insert carrying a full row of values.
    pub fn insert(values: Vec<Cell>) -> Self {
        Self {
            event_type: EventType::Insert,
            row_data: Some(values),
            old_data: None,
            pk_data: None,
        }
    }

    /// An update carrying new values and the key locating the row.
    pub fn update(values: Vec<Cell>, pk_values: Vec<Cell>) -> Self {
        Self {
            event_type: EventType::Update,
            row_data: Some(values),
            old_data: None,
            pk_data: Some(pk_values),
        }
    }

    /// A delete carrying only the key locating the row.
    pub fn delete(pk_values: Vec<Cell>) -> Self {
        Self {
            event_type: EventType::Delete,
            row_data: None,
            old_data: None,
            pk_data: Some(pk_values),
        }
    }

    /// An opaque SQL payload event.
    pub fn sql(statement: impl Into<String>) -> Self {
        Self::payload(EventType::Sql, statement)
    }

    /// An opaque DDL payload event.
    pub fn create(payload: impl Into<String>) -> Self {
        Self::payload(EventType::Create, payload)
    }

    /// A script payload event.
    pub fn script(body: impl Into<String>) -> Self {
        Self::payload(EventType::Script, body)
    }

    fn payload(event_type: EventType, text: impl Into<String>) -> Self {
        Self {
            event_type,
            row_data: Some(vec![Some(text.into())]),
            old_data: None,
            pk_data: None,
        }
    }

    /// Attach before values (builder style).
    pub fn with_old_data(mut self, old: Vec<Cell>) -> Self {
        self.old_data = Some(old);
        self
    }

    /// Key values locating the target row, falling back to the new row
    /// values when no separate key set was transmitted.
    pub fn pk_or_row_data(&self) -> Option<&Vec<Cell>> {
        self.pk_data.as_ref().or(self.row_data.as_ref())
    }

    /// The opaque payload of a SQL/CREATE/BSH event.
    pub fn payload_text(&self) -> Option<&str> {
        match self.event_type {
            EventType::Sql | EventType::Create | EventType::Script => self
                .row_data
                .as_ref()
                .and_then(|cells| cells.first())
                .and_then(|cell| cell.as_deref()),
            _ => None,
        }
    }
}
