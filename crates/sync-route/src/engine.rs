//! The routing engine: one pass over the change log, fanning rows out
//! into per-(node, channel) outgoing batches.

use crate::change::{ChangeLog, ChangeRow};
use crate::router::{Router, RoutingContext};
use crate::window::TransactionWindow;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use sync_model::BatchStats;

/// When an in-flight batch is considered complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAlgorithm {
    /// Seal once the row threshold is reached, but only on a
    /// transaction boundary.
    #[default]
    Default,
    /// Seal at every transaction boundary (one batch per transaction).
    Transactional,
    /// Seal purely on the row threshold, ignoring transactions.
    NonTransactional,
}

/// Per-channel delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    /// Row threshold for sealing a batch
    pub max_batch_size: usize,
    #[serde(default)]
    pub batch_algorithm: BatchAlgorithm,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ChannelConfig {
    pub fn new(channel_id: impl Into<String>, max_batch_size: usize) -> Self {
        Self {
            channel_id: channel_id.into(),
            max_batch_size,
            batch_algorithm: BatchAlgorithm::default(),
            enabled: true,
        }
    }

    /// Channel configuration used when nothing is declared.
    pub fn fallback(channel_id: &str) -> Self {
        Self::new(channel_id, 1_000)
    }

    fn complete(&self, pending_rows: usize, transaction_final: bool) -> bool {
        match self.batch_algorithm {
            BatchAlgorithm::Default => transaction_final && pending_rows >= self.max_batch_size,
            BatchAlgorithm::Transactional => transaction_final,
            BatchAlgorithm::NonTransactional => pending_rows >= self.max_batch_size,
        }
    }
}

/// One sealed batch of routed change rows bound for a node.
#[derive(Debug, Clone)]
pub struct OutgoingBatch {
    /// Durable identity assigned at seal time
    pub batch_id: i64,
    pub node_id: String,
    pub channel_id: String,
    /// Routed rows in capture order
    pub events: Vec<ChangeRow>,
    pub stats: BatchStats,
    pub sealed_at: DateTime<Utc>,
}

/// Allocates durable batch ids, monotonic per (node, channel).
#[async_trait]
pub trait BatchIdAllocator: Send + Sync {
    async fn next_batch_id(&self, node_id: &str, channel_id: &str) -> anyhow::Result<i64>;
}

/// Receives sealed batches, one sink per channel.
///
/// Each channel's sink commits independently (one dedicated connection
/// per channel in a database-backed implementation), so a failure
/// sealing one channel's batch must not block other channels.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn seal(&self, batch: OutgoingBatch) -> anyhow::Result<()>;
}

/// Cooperative cluster-wide lock around a routing pass; only one
/// process routes at a time.
#[async_trait]
pub trait RoutingLock: Send + Sync {
    /// Try to take the lock; `false` means another process holds it and
    /// this pass should be skipped (not an error).
    async fn try_acquire(&self) -> anyhow::Result<bool>;

    async fn release(&self) -> anyhow::Result<()>;
}

/// Outcome of one routing pass.
#[derive(Debug, Default)]
pub struct RoutingResult {
    /// Rows read from the change log
    pub rows_read: u64,
    /// (row, node) assignments made
    pub rows_routed: u64,
    /// Batches sealed and handed to sinks
    pub batches_sealed: u64,
    /// data_ids that matched no destination, recorded for gapless audit
    pub unrouted: Vec<i64>,
    /// Channel id -> error text for per-channel seal failures
    pub channel_errors: Vec<(String, String)>,
    /// True when the pass was skipped because another process held the
    /// routing lock
    pub skipped: bool,
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct AccumulatorKey {
    channel_id: String,
    node_id: String,
}

struct PendingBatch {
    rows: Vec<ChangeRow>,
    stats: BatchStats,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            stats: BatchStats::default(),
        }
    }
}

/// Drives routing passes.
pub struct RoutingEngine {
    context: RoutingContext,
    routers: HashMap<String, Vec<Arc<dyn Router>>>,
    channels: HashMap<String, ChannelConfig>,
    allocator: Arc<dyn BatchIdAllocator>,
    sinks: HashMap<String, Arc<dyn BatchSink>>,
    lock: Arc<dyn RoutingLock>,
    window_size: usize,
}

impl RoutingEngine {
    pub fn new(
        context: RoutingContext,
        allocator: Arc<dyn BatchIdAllocator>,
        lock: Arc<dyn RoutingLock>,
    ) -> Self {
        Self {
            context,
            routers: HashMap::new(),
            channels: HashMap::new(),
            allocator,
            sinks: HashMap::new(),
            lock,
            window_size: 100,
        }
    }

    /// Bind a trigger to the routers it feeds (builder style).
    pub fn with_trigger_routers(
        mut self,
        trigger_id: impl Into<String>,
        routers: Vec<Arc<dyn Router>>,
    ) -> Self {
        self.routers.insert(trigger_id.into(), routers);
        self
    }

    /// Declare a channel (builder style).
    pub fn with_channel(mut self, config: ChannelConfig) -> Self {
        self.channels.insert(config.channel_id.clone(), config);
        self
    }

    /// Attach the sink receiving a channel's sealed batches (builder
    /// style).
    pub fn with_sink(mut self, channel_id: impl Into<String>, sink: Arc<dyn BatchSink>) -> Self {
        self.sinks.insert(channel_id.into(), sink);
        self
    }

    /// Set the transaction look-ahead window size (builder style).
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    /// Run one routing pass over the change log.
    ///
    /// Holds the cooperative routing lock for the duration; remaining
    /// accumulator contents are flushed as batches at pass end.
    pub async fn run_pass<S: ChangeLog>(&self, source: S) -> anyhow::Result<RoutingResult> {
        if !self.lock.try_acquire().await.context("acquiring routing lock")? {
            debug!("routing lock held elsewhere; skipping pass");
            return Ok(RoutingResult {
                skipped: true,
                ..Default::default()
            });
        }
        let outcome = self.run_locked(source).await;
        if let Err(error) = self.lock.release().await {
            warn!(%error, "failed to release routing lock");
        }
        outcome
    }

    async fn run_locked<S: ChangeLog>(&self, source: S) -> anyhow::Result<RoutingResult> {
        let mut result = RoutingResult::default();
        let mut pending: HashMap<AccumulatorKey, PendingBatch> = HashMap::new();
        let mut window = TransactionWindow::new(source, self.window_size);

        while let Some((row, transaction_final)) = window.next().await? {
            result.rows_read += 1;
            let channel = self
                .channels
                .get(&row.channel_id)
                .cloned()
                .unwrap_or_else(|| ChannelConfig::fallback(&row.channel_id));
            if !channel.enabled {
                debug!(channel = channel.channel_id.as_str(), data_id = row.data_id, "channel disabled");
                result.unrouted.push(row.data_id);
                continue;
            }

            let nodes = self.route_row(&row);
            if nodes.is_empty() {
                // recorded, never silently dropped: downstream auditing
                // depends on gapless data_id accounting
                result.unrouted.push(row.data_id);
                continue;
            }

            for node_id in nodes {
                let key = AccumulatorKey {
                    channel_id: row.channel_id.clone(),
                    node_id: node_id.clone(),
                };
                let batch = pending.entry(key.clone()).or_insert_with(PendingBatch::new);
                batch.stats.count_event(row.event_type);
                batch.rows.push(row.clone());
                result.rows_routed += 1;

                // only transaction-final rows may close a batch
                if channel.complete(batch.rows.len(), transaction_final) {
                    let full = pending.remove(&key).expect("pending batch just touched");
                    self.seal(&key, full, &mut result).await;
                }
            }
        }

        // pass end: flush whatever is still pending
        let leftovers: Vec<(AccumulatorKey, PendingBatch)> = pending.drain().collect();
        for (key, batch) in leftovers {
            self.seal(&key, batch, &mut result).await;
        }

        info!(
            rows = result.rows_read,
            routed = result.rows_routed,
            batches = result.batches_sealed,
            unrouted = result.unrouted.len(),
            "routing pass complete"
        );
        Ok(result)
    }

    fn route_row(&self, row: &ChangeRow) -> Vec<String> {
        let routers = match self.routers.get(&row.trigger_id) {
            Some(routers) => routers,
            None => {
                warn!(
                    trigger = row.trigger_id.as_str(),
                    data_id = row.data_id,
                    "no router bound to trigger"
                );
                return Vec::new();
            }
        };
        let mut nodes: Vec<String> = Vec::new();
        for router in routers {
            for node in router.route(&self.context, row).resolve(&self.context) {
                if !nodes.contains(&node) {
                    nodes.push(node);
                }
            }
        }
        nodes
    }

    async fn seal(&self, key: &AccumulatorKey, batch: PendingBatch, result: &mut RoutingResult) {
        let sealed = async {
            let batch_id = self
                .allocator
                .next_batch_id(&key.node_id, &key.channel_id)
                .await
                .context("allocating batch id")?;
            let outgoing = OutgoingBatch {
                batch_id,
                node_id: key.node_id.clone(),
                channel_id: key.channel_id.clone(),
                events: batch.rows,
                stats: batch.stats,
                sealed_at: Utc::now(),
            };
            let sink = self
                .sinks
                .get(&key.channel_id)
                .ok_or_else(|| anyhow::anyhow!("no sink for channel {}", key.channel_id))?;
            sink.seal(outgoing).await
        }
        .await;

        match sealed {
            Ok(()) => result.batches_sealed += 1,
            Err(error) => {
                // one channel failing must not stop the others
                warn!(
                    channel = key.channel_id.as_str(),
                    node = key.node_id.as_str(),
                    %error,
                    "failed to seal batch"
                );
                result
                    .channel_errors
                    .push((key.channel_id.clone(), format!("{error:#}")));
            }
        }
    }
}
