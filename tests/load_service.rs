//! End-to-end load tests: wire stream in, database rows and acks out.

use mesh_sync::testing::{cells, table};
use mesh_sync::LoadService;
use std::io::Cursor;
use std::sync::Arc;
use sync_load::conflict::{ConflictSetting, ConflictSettings, ResolutionPolicy};
use sync_load::testing::{MemoryBatchStore, MemoryPlatform};
use sync_load::DatabaseWriter;
use sync_load::IncomingBatchStore;
use sync_model::{Batch, RowEvent};
use sync_protocol::ProtocolWriter;
use sync_transform::{TransformPipeline, TransformRegistry};

fn empty_pipeline() -> TransformPipeline {
    TransformPipeline::new(Arc::new(TransformRegistry::with_builtins()), vec![])
}

fn service(platform: &MemoryPlatform, store: &MemoryBatchStore) -> LoadService {
    service_with_settings(platform, store, vec![])
}

fn service_with_settings(
    platform: &MemoryPlatform,
    store: &MemoryBatchStore,
    settings: Vec<ConflictSetting>,
) -> LoadService {
    let writer = DatabaseWriter::new(Arc::new(platform.clone()), ConflictSettings::new(settings));
    LoadService::new("target-node", writer, Arc::new(store.clone()), empty_pipeline())
}

/// One batch: two inserts, an update, and a delete against `item`.
fn sample_stream(batch_id: i64) -> Vec<u8> {
    let item = table("item", &["id", "name"], 1);
    let mut writer = ProtocolWriter::new(Vec::new());
    writer.write_node_id("source-node").unwrap();
    let batch = Batch::new(batch_id, "default", "source-node");
    writer.start_batch(&batch).unwrap();
    writer.write_table(&item).unwrap();
    writer
        .write_event(&RowEvent::insert(cells(&[Some("1"), Some("alpha")])))
        .unwrap();
    writer
        .write_event(&RowEvent::insert(cells(&[Some("2"), Some("beta")])))
        .unwrap();
    writer
        .write_event(&RowEvent::update(
            cells(&[Some("1"), Some("alpha2")]),
            cells(&[Some("1")]),
        ))
        .unwrap();
    writer
        .write_event(&RowEvent::delete(cells(&[Some("2")])))
        .unwrap();
    writer.commit_batch(batch_id).unwrap();
    writer.into_inner()
}

#[tokio::test]
async fn loads_a_batch_and_acknowledges() {
    let platform = MemoryPlatform::new();
    platform.register_table(table("item", &["id", "name"], 1));
    let store = MemoryBatchStore::new();
    let mut service = service(&platform, &store);

    let acks = service
        .load_stream(Cursor::new(sample_stream(500)))
        .await
        .unwrap();
    assert_eq!(acks.len(), 1);
    let ack = &acks[0];
    assert!(ack.ok);
    assert_eq!(ack.batch_id, 500);
    assert_eq!(ack.node_id, "target-node");
    assert_eq!(ack.stats.insert_count, 2);
    assert_eq!(ack.stats.update_count, 1);
    assert_eq!(ack.stats.delete_count, 1);
    assert!(ack.stats.byte_count > 0);

    assert_eq!(
        platform.rows("item"),
        vec![cells(&[Some("1"), Some("alpha2")])]
    );
}

#[tokio::test]
async fn replayed_batch_is_skipped_but_acknowledged() {
    let platform = MemoryPlatform::new();
    platform.register_table(table("item", &["id", "name"], 1));
    let store = MemoryBatchStore::new();
    let mut service = service(&platform, &store);

    service
        .load_stream(Cursor::new(sample_stream(500)))
        .await
        .unwrap();
    let statements_after_first = platform.executed_statements().len();

    // the sender never saw the ack and pushes the same batch again
    let acks = service
        .load_stream(Cursor::new(sample_stream(500)))
        .await
        .unwrap();
    assert!(acks[0].ok);
    assert_eq!(
        platform.executed_statements().len(),
        statements_after_first,
        "idempotent replay must not execute DML"
    );
    assert_eq!(
        platform.rows("item"),
        vec![cells(&[Some("1"), Some("alpha2")])]
    );

    // a lower batch id than the highest committed is also a duplicate
    let acks = service
        .load_stream(Cursor::new(sample_stream(499)))
        .await
        .unwrap();
    assert!(acks[0].ok);
    assert_eq!(platform.executed_statements().len(), statements_after_first);
}

#[tokio::test]
async fn manual_conflict_rolls_back_and_reports_row() {
    let platform = MemoryPlatform::new();
    platform.register_table(table("item", &["id", "name"], 1));
    platform.seed_row("item", cells(&[Some("2"), Some("existing")]));
    let store = MemoryBatchStore::new();
    let mut setting = ConflictSetting::defaults();
    setting.insert_policy = ResolutionPolicy::Manual;
    let mut service = service_with_settings(&platform, &store, vec![setting]);

    let acks = service
        .load_stream(Cursor::new(sample_stream(600)))
        .await
        .unwrap();
    let ack = &acks[0];
    assert!(!ack.ok);
    let error = ack.error.as_ref().unwrap();
    // rows: insert ok, insert conflicts at ordinal 2
    assert_eq!(error.failed_row_number, Some(2));
    assert!(error.message.contains("conflict"));

    // rollback left the pre-batch state intact and nothing was recorded
    // as committed
    assert_eq!(
        platform.rows("item"),
        vec![cells(&[Some("2"), Some("existing")])]
    );
    assert!(!store.is_committed("source-node", 600).await.unwrap());
}

#[tokio::test]
async fn failed_batch_does_not_stop_later_batches() {
    let platform = MemoryPlatform::new();
    platform.register_table(table("item", &["id", "name"], 1));
    platform.seed_row("item", cells(&[Some("2"), Some("existing")]));
    let store = MemoryBatchStore::new();
    let mut setting = ConflictSetting::defaults();
    setting.insert_policy = ResolutionPolicy::Manual;
    let mut service = service_with_settings(&platform, &store, vec![setting]);

    let mut stream = sample_stream(700);
    // second batch touches only row 9, no conflicts
    let item = table("item", &["id", "name"], 1);
    let mut writer = ProtocolWriter::new(Vec::new());
    let batch = Batch::new(701, "default", "source-node");
    writer.start_batch(&batch).unwrap();
    writer.write_table(&item).unwrap();
    writer
        .write_event(&RowEvent::insert(cells(&[Some("9"), Some("late")])))
        .unwrap();
    writer.commit_batch(701).unwrap();
    stream.extend_from_slice(&writer.into_inner());

    let acks = service.load_stream(Cursor::new(stream)).await.unwrap();
    assert_eq!(acks.len(), 2);
    assert!(!acks[0].ok);
    assert!(acks[1].ok);
    assert!(store.is_committed("source-node", 701).await.unwrap());
    assert!(platform
        .rows("item")
        .contains(&cells(&[Some("9"), Some("late")])));
}

#[tokio::test]
async fn fallback_statistics_reach_the_ack() {
    let platform = MemoryPlatform::new();
    platform.register_table(table("item", &["id", "name"], 1));
    platform.seed_row("item", cells(&[Some("1"), Some("pre-existing")]));
    let store = MemoryBatchStore::new();
    let mut service = service(&platform, &store);

    let acks = service
        .load_stream(Cursor::new(sample_stream(800)))
        .await
        .unwrap();
    let ack = &acks[0];
    assert!(ack.ok);
    // the first insert fell back to an update of the pre-existing row
    assert_eq!(ack.stats.fallback_update_count, 1);
    assert_eq!(ack.stats.insert_count, 1);
}
