//! Captured change rows and the change-log cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_model::event::Cell;
use sync_model::EventType;

/// One row captured by the trigger subsystem into the change log.
///
/// `data_id` is a gapless, ascending sequence assigned at capture time;
/// `transaction_id` groups rows captured inside one source transaction.
/// Row values are carried in the same text-cell form they will take on
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    /// Gapless capture sequence
    pub data_id: i64,
    /// Source transaction identifier, when the trigger captured one
    pub transaction_id: Option<String>,
    /// Trigger that captured the row; selects the router set
    pub trigger_id: String,
    /// Delivery channel the owning trigger is configured for
    pub channel_id: String,
    /// Source table qualifiers
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
    /// Column names of the captured table, in captured value order
    pub column_names: Vec<String>,
    /// Primary-key column names, in key order
    pub pk_column_names: Vec<String>,
    /// What happened
    pub event_type: EventType,
    /// New/current values
    pub row_data: Option<Vec<Cell>>,
    /// Before values
    pub old_data: Option<Vec<Cell>>,
    /// Primary-key values
    pub pk_data: Option<Vec<Cell>>,
    /// Capture timestamp
    pub create_time: DateTime<Utc>,
}

impl ChangeRow {
    /// Value of a named column from the current row image (falling back
    /// to the before image for deletes), case-insensitive.
    pub fn column_value(&self, name: &str) -> Cell {
        let index = self
            .column_names
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        let values = self.row_data.as_ref().or(self.old_data.as_ref())?;
        values.get(index).cloned().flatten()
    }
}

/// Ordered cursor over queued change rows.
///
/// The producer (the trigger subsystem, out of scope here) guarantees
/// ascending `data_id` order with transaction members contiguous in
/// commit order; the routing engine only reads.
#[async_trait]
pub trait ChangeLog: Send {
    /// The next change row, or `None` when the queue is drained.
    async fn next(&mut self) -> anyhow::Result<Option<ChangeRow>>;
}
