//! Committed-batch bookkeeping for idempotent replay.

use async_trait::async_trait;

/// Durable record of which incoming batches have been committed, keyed
/// by (source node, batch id).
///
/// Batch ids are assigned monotonically per source node, so "already
/// committed" reduces to an id comparison against the highest committed
/// id for that node. A replayed batch must be skipped and acknowledged
/// as successful without touching the database; this is a correctness
/// requirement (senders retry after lost acks), not an optimization.
#[async_trait]
pub trait IncomingBatchStore: Send + Sync {
    /// Whether the batch was already committed for this source node.
    async fn is_committed(&self, source_node_id: &str, batch_id: i64) -> anyhow::Result<bool>;

    /// Record a batch as committed. Called after the batch transaction
    /// commits, inside the same logical unit of work where the backing
    /// store allows it.
    async fn mark_committed(&self, source_node_id: &str, batch_id: i64) -> anyhow::Result<()>;

    /// Highest committed batch id for a source node, if any.
    async fn highest_committed(&self, source_node_id: &str) -> anyhow::Result<Option<i64>>;
}
