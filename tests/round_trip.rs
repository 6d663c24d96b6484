//! Wire round-trip: a batch serialized by the protocol writer must come
//! back through the reader as the identical Table/RowEvent sequence.

use mesh_sync::testing::{cells, table};
use std::io::Cursor;
use sync_model::{Batch, BinaryEncoding, EventType, RowEvent};
use sync_protocol::{ProtocolReader, ProtocolWriter};

fn mixed_events() -> Vec<RowEvent> {
    vec![
        RowEvent::insert(cells(&[Some("1"), Some("alice"), None])),
        // NULL and empty string are distinct cells and must survive
        RowEvent::insert(cells(&[Some("2"), Some(""), Some("x,y")])),
        RowEvent::update(cells(&[Some("9"), Some("bob"), None]), cells(&[Some("2")]))
            .with_old_data(cells(&[Some("2"), Some("old"), Some("o")])),
        RowEvent::delete(cells(&[Some("1")])),
        RowEvent::sql("update item set price = price * 2 where id = 3"),
        RowEvent::script("audit(\"loaded\")"),
    ]
}

#[test]
fn round_trip_reproduces_identical_events() {
    let source_table = table("item", &["id", "name", "notes"], 1);
    let events = mixed_events();

    let mut writer = ProtocolWriter::new(Vec::new());
    writer.write_node_id("store-42").unwrap();
    let batch = Batch::new(1001, "sale", "store-42").with_encoding(BinaryEncoding::Base64);
    writer.start_batch(&batch).unwrap();
    writer.write_table(&source_table).unwrap();
    for event in &events {
        writer.write_event(event).unwrap();
    }
    writer.commit_batch(1001).unwrap();
    let bytes = writer.into_inner();

    let mut reader = ProtocolReader::new(Cursor::new(bytes));
    let read_batch = reader.next_batch().unwrap().unwrap();
    assert_eq!(read_batch.batch_id, 1001);
    assert_eq!(read_batch.channel_id, "sale");
    assert_eq!(read_batch.source_node_id, "store-42");
    assert_eq!(read_batch.binary_encoding, BinaryEncoding::Base64);

    let read_table = reader.next_table().unwrap().unwrap();
    assert_eq!(read_table, source_table);

    let mut read_events = Vec::new();
    while let Some(event) = reader.next_event().unwrap() {
        read_events.push(event);
    }
    assert_eq!(read_events, events);

    assert!(reader.next_table().unwrap().is_none());
    assert!(reader.next_batch().unwrap().is_none());
}

#[test]
fn update_split_point_follows_column_count() {
    // the update record is row values then pk values; the reader splits
    // at the table's column count
    let source_table = table("t", &["a", "b"], 1);
    let event = RowEvent::update(cells(&[Some("va"), Some("vb")]), cells(&[Some("ka")]));

    let mut writer = ProtocolWriter::new(Vec::new());
    let batch = Batch::new(1, "default", "n");
    writer.start_batch(&batch).unwrap();
    writer.write_table(&source_table).unwrap();
    writer.write_event(&event).unwrap();
    writer.commit_batch(1).unwrap();
    let text = String::from_utf8(writer.into_inner()).unwrap();
    assert!(text.contains("update,va,vb,ka\n"));

    let mut reader = ProtocolReader::new(Cursor::new(text.into_bytes()));
    reader.next_batch().unwrap().unwrap();
    reader.next_table().unwrap().unwrap();
    let read = reader.next_event().unwrap().unwrap();
    assert_eq!(read.row_data, Some(cells(&[Some("va"), Some("vb")])));
    assert_eq!(read.pk_data, Some(cells(&[Some("ka")])));
}

#[test]
fn unknown_directive_between_batches_is_tolerated() {
    let source_table = table("t", &["a"], 1);
    let mut writer = ProtocolWriter::new(Vec::new());
    writer.write_node_id("n").unwrap();
    let batch = Batch::new(1, "default", "n");
    writer.start_batch(&batch).unwrap();
    writer.write_table(&source_table).unwrap();
    writer
        .write_event(&RowEvent::insert(cells(&[Some("1")])))
        .unwrap();
    writer.commit_batch(1).unwrap();
    let mut text = String::from_utf8(writer.into_inner()).unwrap();

    // splice an extension directive the reader has never heard of
    // between two valid records
    text = text.replace("insert,1\n", "retention,30d,archive\ninsert,1\n");
    // and some pre-batch noise, which is discardable by contract
    let noisy = format!("hello,world\n{text}");

    let mut reader = ProtocolReader::new(Cursor::new(noisy.into_bytes()));
    let batch = reader.next_batch().unwrap().unwrap();
    assert_eq!(batch.batch_id, 1);
    reader.next_table().unwrap().unwrap();
    let event = reader.next_event().unwrap().unwrap();
    assert_eq!(event.event_type, EventType::Insert);
    assert_eq!(event.row_data, Some(cells(&[Some("1")])));
    assert!(reader.next_event().unwrap().is_none());
    assert!(reader.next_table().unwrap().is_none());
}
