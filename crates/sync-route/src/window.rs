//! Bounded look-ahead over the change-log cursor for transaction
//! boundary detection.

use crate::change::{ChangeLog, ChangeRow};
use std::collections::VecDeque;

/// Wraps a [`ChangeLog`] with a bounded look-ahead buffer.
///
/// A row is *transaction-final* when no later row within the window
/// shares its transaction id. Only transaction-final rows may trigger
/// batch-complete evaluation downstream.
///
/// A transaction wider than the window is reported as boundary-reached
/// anyway (the window holds no evidence it continues); operators size
/// the window above their largest transaction. Rows with no transaction
/// id are their own boundary.
pub struct TransactionWindow<S> {
    source: S,
    buffer: VecDeque<ChangeRow>,
    size: usize,
    drained: bool,
}

impl<S: ChangeLog> TransactionWindow<S> {
    pub fn new(source: S, size: usize) -> Self {
        Self {
            source,
            buffer: VecDeque::with_capacity(size + 1),
            size: size.max(1),
            drained: false,
        }
    }

    /// The next change row plus its transaction-final flag.
    pub async fn next(&mut self) -> anyhow::Result<Option<(ChangeRow, bool)>> {
        self.fill(self.size + 1).await?;
        let row = match self.buffer.pop_front() {
            Some(row) => row,
            None => return Ok(None),
        };
        let last_in_transaction = match &row.transaction_id {
            None => true,
            Some(txn) => !self
                .buffer
                .iter()
                .any(|later| later.transaction_id.as_deref() == Some(txn.as_str())),
        };
        Ok(Some((row, last_in_transaction)))
    }

    async fn fill(&mut self, target: usize) -> anyhow::Result<()> {
        while !self.drained && self.buffer.len() < target {
            match self.source.next().await? {
                Some(row) => self.buffer.push_back(row),
                None => self.drained = true,
            }
        }
        Ok(())
    }
}
