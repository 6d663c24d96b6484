//! Routing-to-load pipeline tests: change rows are routed into
//! batches, extracted onto the wire, and replayed on the target.

use mesh_sync::testing::{cells, change_row, table};
use mesh_sync::{ExtractService, LoadService};
use std::io::Cursor;
use std::sync::Arc;
use sync_load::conflict::ConflictSettings;
use sync_load::testing::{MemoryBatchStore, MemoryPlatform};
use sync_load::DatabaseWriter;
use sync_model::EventType;
use sync_protocol::ProtocolWriter;
use sync_route::testing::{MemoryBatchSink, MemoryChangeLog, MemoryIdAllocator, MemoryRoutingLock};
use sync_route::{ChannelConfig, ColumnMatchRouter, DefaultRouter, RoutingContext, RoutingEngine};
use sync_transform::{TransformPipeline, TransformRegistry};

fn empty_pipeline() -> TransformPipeline {
    TransformPipeline::new(Arc::new(TransformRegistry::with_builtins()), vec![])
}

#[tokio::test]
async fn transaction_grouping_survives_routing() {
    let item = table("item", &["id", "name"], 1);
    let rows = vec![
        change_row(1, Some("T1"), "trg", "default", &item, EventType::Insert, Some(cells(&[Some("1"), Some("a")])), None),
        change_row(2, Some("T1"), "trg", "default", &item, EventType::Insert, Some(cells(&[Some("2"), Some("b")])), None),
        change_row(3, Some("T1"), "trg", "default", &item, EventType::Insert, Some(cells(&[Some("3"), Some("c")])), None),
        change_row(4, Some("T2"), "trg", "default", &item, EventType::Insert, Some(cells(&[Some("4"), Some("d")])), None),
        change_row(5, Some("T2"), "trg", "default", &item, EventType::Insert, Some(cells(&[Some("5"), Some("e")])), None),
        change_row(6, Some("T2"), "trg", "default", &item, EventType::Insert, Some(cells(&[Some("6"), Some("f")])), None),
    ];

    let sink = MemoryBatchSink::new();
    let engine = RoutingEngine::new(
        RoutingContext {
            source_node_id: "root".to_string(),
            target_nodes: vec!["store-1".to_string()],
        },
        Arc::new(MemoryIdAllocator::new()),
        Arc::new(MemoryRoutingLock::new()),
    )
    .with_trigger_routers("trg", vec![Arc::new(DefaultRouter)])
    .with_channel(ChannelConfig::new("default", 2))
    .with_sink("default", Arc::new(sink.clone()))
    .with_window_size(3);

    let result = engine
        .run_pass(MemoryChangeLog::new(rows))
        .await
        .unwrap();
    assert_eq!(result.rows_read, 6);
    assert_eq!(result.batches_sealed, 2);
    assert!(result.unrouted.is_empty());

    // no batch boundary inside either transaction
    let sealed = sink.sealed();
    let ids: Vec<Vec<i64>> = sealed
        .iter()
        .map(|b| b.events.iter().map(|e| e.data_id).collect())
        .collect();
    assert_eq!(ids, vec![vec![1, 2, 3], vec![4, 5, 6]]);
}

#[tokio::test]
async fn routed_batches_flow_through_extract_and_load() {
    let item = table("item", &["id", "store_id", "name"], 1);
    let rows = vec![
        change_row(
            1, None, "trg", "default", &item, EventType::Insert,
            Some(cells(&[Some("1"), Some("store-1"), Some("first")])), None,
        ),
        change_row(
            2, None, "trg", "default", &item, EventType::Insert,
            Some(cells(&[Some("2"), Some("store-2"), Some("second")])), None,
        ),
    ];

    // per-row addressing: each row goes only to the store named in its
    // store_id column
    let sink = MemoryBatchSink::new();
    let engine = RoutingEngine::new(
        RoutingContext {
            source_node_id: "root".to_string(),
            target_nodes: vec!["store-1".to_string(), "store-2".to_string()],
        },
        Arc::new(MemoryIdAllocator::new()),
        Arc::new(MemoryRoutingLock::new()),
    )
    .with_trigger_routers(
        "trg",
        vec![Arc::new(
            ColumnMatchRouter::from_expression("store_id=:NODE_ID").unwrap(),
        )],
    )
    .with_channel(ChannelConfig::new("default", 10))
    .with_sink("default", Arc::new(sink.clone()));

    engine.run_pass(MemoryChangeLog::new(rows)).await.unwrap();
    let sealed = sink.sealed();
    assert_eq!(sealed.len(), 2);

    // extract the batch bound for store-1 and load it there
    let store_1_batch = sealed
        .iter()
        .find(|b| b.node_id == "store-1")
        .expect("batch for store-1");
    let extractor = ExtractService::new("root", empty_pipeline());
    let mut wire = ProtocolWriter::new(Vec::new());
    extractor.begin_stream(&mut wire).unwrap();
    extractor.extract_batch(store_1_batch, &mut wire).unwrap();

    let platform = MemoryPlatform::new();
    platform.register_table(item.clone());
    let writer = DatabaseWriter::new(Arc::new(platform.clone()), ConflictSettings::new(vec![]));
    let mut loader = LoadService::new(
        "store-1",
        writer,
        Arc::new(MemoryBatchStore::new()),
        empty_pipeline(),
    );
    let acks = loader
        .load_stream(Cursor::new(wire.into_inner()))
        .await
        .unwrap();
    assert_eq!(acks.len(), 1);
    assert!(acks[0].ok);
    assert_eq!(acks[0].batch_id, store_1_batch.batch_id);

    // only store-1's row landed
    assert_eq!(
        platform.rows("item"),
        vec![cells(&[Some("1"), Some("store-1"), Some("first")])]
    );
}
