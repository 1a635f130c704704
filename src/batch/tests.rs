//! Batch builder tests

use super::*;
use crate::config::{DeliveryLimits, FieldMappings, LoadConfig, StreamTargetConfig};
use crate::error::Error;
use crate::protocol::Message;
use crate::types::JsonObject;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn load_config() -> LoadConfig {
    LoadConfig::new("int-key")
        .with_stream(
            "accounts",
            StreamTargetConfig::new("accountId")
                .with_mapping("accountId", "id")
                .with_mapping("name", "name"),
        )
        .with_stream("visitors", StreamTargetConfig::new("visitorId").with_mapping("visitorId", "id"))
}

fn schema(stream: &str) -> Message {
    Message::schema(
        stream,
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "name": {"type": ["null", "string"]}
            }
        }),
        vec!["id".to_string()],
        None,
    )
}

fn record(stream: &str, id: usize, version: Option<i64>) -> Message {
    Message::record(
        stream,
        object(json!({"id": format!("id-{id}"), "name": format!("name {id}")})),
        version,
        None,
    )
}

fn flushes(events: &[BatchEvent]) -> Vec<&Batch> {
    events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::Flush(b) => Some(b),
            _ => None,
        })
        .collect()
}

fn run(builder: &mut BatchBuilder, messages: Vec<Message>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    for message in messages {
        events.extend(builder.handle(message).unwrap());
    }
    events
}

// ============================================================================
// Transforms
// ============================================================================

#[test]
fn test_flatten_nested_and_lists() {
    let flat = flatten(&object(json!({
        "a": 1,
        "b": {"c": 2, "d": {"e": 3}},
        "l": [1, 2]
    })));
    assert_eq!(
        Value::Object(flat),
        json!({"a": 1, "b__c": 2, "b__d__e": 3, "l": "[1,2]"})
    );
}

#[test]
fn test_remap_with_identical_names() {
    let mappings = FieldMappings(vec![
        ("accountId".to_string(), "id".to_string()),
        ("name".to_string(), "name".to_string()),
    ]);
    let mapped = remap(
        "accounts",
        object(json!({"id": "x", "name": "n", "extra": 1})),
        &mappings,
    )
    .unwrap();
    assert_eq!(
        Value::Object(mapped),
        json!({"accountId": "x", "name": "n", "extra": 1})
    );
}

#[test]
fn test_remap_missing_source() {
    let mappings = FieldMappings(vec![("accountId".to_string(), "uuid".to_string())]);
    let err = remap("accounts", object(json!({"id": "x"})), &mappings).unwrap_err();
    assert!(matches!(err, Error::Mapping { .. }));
}

#[test]
fn test_shape_record() {
    let shaped = shape_record(
        "accounts",
        object(json!({"name": "n", "accountId": "x", "tier": 2})),
        "accountId",
    )
    .unwrap();
    assert_eq!(shaped.keys().next().map(String::as_str), Some("accountId"));
    assert_eq!(
        Value::Object(shaped),
        json!({"accountId": "x", "values": {"name": "n", "tier": 2}})
    );

    let err = shape_record("accounts", object(json!({"name": "n"})), "accountId").unwrap_err();
    assert!(matches!(err, Error::Mapping { .. }));
}

// ============================================================================
// Flush triggers
// ============================================================================

#[test]
fn test_record_limit_and_last_record() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    let mut messages = vec![
        Message::activate_version("accounts", 7),
        schema("accounts"),
        Message::volume("accounts", 1050),
    ];
    messages.extend((0..1050).map(|i| record("accounts", i, Some(7))));

    let events = run(&mut builder, messages);
    let batches = flushes(&events);

    assert_eq!(
        batches.iter().map(|b| b.len()).collect::<Vec<_>>(),
        vec![500, 500, 50]
    );
    assert_eq!(
        batches.iter().map(|b| b.reason).collect::<Vec<_>>(),
        vec![
            FlushReason::RecordLimit,
            FlushReason::RecordLimit,
            FlushReason::LastRecord
        ]
    );
    assert_eq!(batches[2].index, 3);
    assert_eq!(
        events.last(),
        Some(&BatchEvent::StreamClosed {
            stream: "accounts".to_string(),
            records: 1050,
            batches: 3,
        })
    );
    assert_eq!(builder.phase(), BuilderPhase::BetweenStreams);
}

#[test]
fn test_batches_stay_under_byte_limit() {
    let one = record_size(
        &shape_record(
            "accounts",
            object(json!({"accountId": "id-0", "name": "name 0"})),
            "accountId",
        )
        .unwrap(),
    );
    let max_bytes = one * 3 + one / 2;
    let limits = DeliveryLimits::default().with_max_bytes(max_bytes);
    let mut builder = BatchBuilder::new(load_config(), limits);

    let mut messages = vec![schema("accounts"), Message::volume("accounts", 10)];
    messages.extend((0..10).map(|i| record("accounts", i, None)));
    let events = run(&mut builder, messages);

    let batches = flushes(&events);
    assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 10);
    for batch in &batches {
        let total: usize = batch.records.iter().map(record_size).sum();
        assert_eq!(total, batch.bytes);
        assert!(total < max_bytes || batch.len() == 1);
    }
    assert_eq!(batches[0].reason, FlushReason::ByteLimit);
}

#[test]
fn test_oversized_record_is_sent_alone() {
    let limits = DeliveryLimits::default().with_max_bytes(1);
    let mut builder = BatchBuilder::new(load_config(), limits);
    let events = run(
        &mut builder,
        vec![
            schema("accounts"),
            Message::volume("accounts", 3),
            record("accounts", 1, None),
            record("accounts", 2, None),
            record("accounts", 3, None),
        ],
    );
    let batches = flushes(&events);
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.len() == 1));
}

#[test]
fn test_zero_volume_closes_immediately() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    let events = run(&mut builder, vec![schema("accounts"), Message::volume("accounts", 0)]);
    assert_eq!(
        events,
        vec![BatchEvent::StreamClosed {
            stream: "accounts".to_string(),
            records: 0,
            batches: 0,
        }]
    );
}

#[test]
fn test_finish_flushes_open_streams() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    run(
        &mut builder,
        vec![
            schema("accounts"),
            Message::volume("accounts", 5),
            record("accounts", 1, None),
            record("accounts", 2, None),
        ],
    );

    let events = builder.finish();
    let batches = flushes(&events);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].reason, FlushReason::EndOfInput);
    assert!(matches!(events.last(), Some(BatchEvent::StreamClosed { records: 2, .. })));
    assert!(builder.finish().is_empty());
}

#[test]
fn test_state_passes_through_in_order() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    let events = run(
        &mut builder,
        vec![
            Message::state(json!({"bookmarks": {}})),
            schema("accounts"),
            Message::volume("accounts", 1),
            record("accounts", 1, None),
            Message::state(json!({"bookmarks": {"accounts": {}}})),
        ],
    );
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], BatchEvent::State(json!({"bookmarks": {}})));
    assert!(matches!(events[1], BatchEvent::Flush(_)));
    assert!(matches!(events[2], BatchEvent::StreamClosed { .. }));
    assert!(matches!(events[3], BatchEvent::State(_)));
}

#[test]
fn test_batch_body_shape() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    let events = run(
        &mut builder,
        vec![
            schema("accounts"),
            Message::volume("accounts", 1),
            record("accounts", 1, None),
        ],
    );
    assert_eq!(
        flushes(&events)[0].to_body(),
        json!([{"accountId": "id-1", "values": {"name": "name 1"}}])
    );
}

// ============================================================================
// Protocol violations
// ============================================================================

#[test]
fn test_record_before_schema() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    let err = builder.handle(record("accounts", 1, None)).unwrap_err();
    assert!(matches!(err, Error::SchemaNotSeen { .. }));
    assert!(err.is_protocol_violation());
}

#[test]
fn test_commingled_streams() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    run(&mut builder, vec![schema("accounts"), schema("visitors")]);
    let err = builder.handle(record("accounts", 1, None)).unwrap_err();
    assert!(matches!(err, Error::CommingledStreams { .. }));
}

#[test]
fn test_commingled_versions() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    run(
        &mut builder,
        vec![
            Message::activate_version("accounts", 1),
            schema("accounts"),
            record("accounts", 1, Some(1)),
        ],
    );
    let err = builder.handle(record("accounts", 2, Some(2))).unwrap_err();
    assert!(matches!(err, Error::CommingledStreams { .. }));
}

#[test]
fn test_first_record_pins_version() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    run(&mut builder, vec![schema("accounts"), record("accounts", 1, Some(5))]);
    assert!(builder.handle(record("accounts", 2, Some(6))).is_err());
    assert_eq!(builder.record_count("accounts"), 1);
}

#[test]
fn test_invalid_record_is_fatal() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    run(&mut builder, vec![schema("accounts")]);
    let bad = Message::record("accounts", object(json!({"id": 5})), None, None);
    let err = builder.handle(bad).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn test_schema_for_unconfigured_stream() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    let err = builder.handle(schema("orders")).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn test_record_after_stream_closed() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    run(
        &mut builder,
        vec![schema("accounts"), Message::volume("accounts", 1), record("accounts", 1, None)],
    );
    let err = builder.handle(record("accounts", 2, None)).unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_stream_resynced_after_close() {
    let mut builder = BatchBuilder::new(load_config(), DeliveryLimits::default());
    let events = run(
        &mut builder,
        vec![
            schema("accounts"),
            Message::volume("accounts", 1),
            record("accounts", 1, None),
            schema("accounts"),
            Message::volume("accounts", 1),
            record("accounts", 2, None),
        ],
    );

    let batches = flushes(&events);
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.len() == 1 && b.reason == FlushReason::LastRecord));
    assert_eq!(batches[0].records[0]["accountId"], json!("id-1"));
    assert_eq!(batches[1].records[0]["accountId"], json!("id-2"));

    let closed: Vec<&BatchEvent> = events
        .iter()
        .filter(|e| matches!(e, BatchEvent::StreamClosed { records: 1, batches: 1, .. }))
        .collect();
    assert_eq!(closed.len(), 2);
    assert_eq!(builder.record_count("accounts"), 1);
}
