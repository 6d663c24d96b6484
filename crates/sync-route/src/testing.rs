//! In-memory fakes for routing tests.

use crate::change::{ChangeLog, ChangeRow};
use crate::engine::{BatchIdAllocator, BatchSink, OutgoingBatch, RoutingLock};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A [`ChangeLog`] over a fixed row list.
pub struct MemoryChangeLog {
    rows: VecDeque<ChangeRow>,
}

impl MemoryChangeLog {
    pub fn new(rows: Vec<ChangeRow>) -> Self {
        Self { rows: rows.into() }
    }
}

#[async_trait]
impl ChangeLog for MemoryChangeLog {
    async fn next(&mut self) -> anyhow::Result<Option<ChangeRow>> {
        Ok(self.rows.pop_front())
    }
}

/// Monotonic batch ids per (node, channel).
#[derive(Default)]
pub struct MemoryIdAllocator {
    next: Mutex<HashMap<(String, String), i64>>,
}

impl MemoryIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchIdAllocator for MemoryIdAllocator {
    async fn next_batch_id(&self, node_id: &str, channel_id: &str) -> anyhow::Result<i64> {
        let mut next = self.next.lock().unwrap();
        let counter = next
            .entry((node_id.to_string(), channel_id.to_string()))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// Collects sealed batches; optionally fails every seal to exercise
/// per-channel error isolation.
#[derive(Default, Clone)]
pub struct MemoryBatchSink {
    batches: Arc<Mutex<Vec<OutgoingBatch>>>,
    fail: Arc<AtomicBool>,
}

impl MemoryBatchSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent seal fail.
    pub fn fail_seals(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Sealed batches in seal order.
    pub fn sealed(&self) -> Vec<OutgoingBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSink for MemoryBatchSink {
    async fn seal(&self, batch: OutgoingBatch) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("sink unavailable");
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Single-process cooperative lock.
#[derive(Default)]
pub struct MemoryRoutingLock {
    held: AtomicBool,
}

impl MemoryRoutingLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-acquire the lock, simulating another routing process.
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RoutingLock for MemoryRoutingLock {
    async fn try_acquire(&self) -> anyhow::Result<bool> {
        Ok(self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    async fn release(&self) -> anyhow::Result<()> {
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }
}
