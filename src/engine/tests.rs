//! Tests for engine module

use super::*;
use crate::catalog::{Catalog, CatalogEntry};
use crate::config::StreamFilterConfig;
use crate::database::DuckDbSource;
use crate::destination::StaticKeyFilter;
use crate::protocol::Message;
use crate::schema::{JsonSchema, JsonType, SchemaProperty};
use crate::state::{BookmarkUpdate, State};
use pretty_assertions::assert_eq;
use serde_json::json;

const A1: &str = "00000000-0000-4000-8000-000000000001";
const A2: &str = "00000000-0000-4000-8000-000000000002";
const A3: &str = "00000000-0000-4000-8000-000000000003";

fn seeded_db() -> DuckDbSource {
    let db = DuckDbSource::in_memory().unwrap();
    db.execute_batch(&format!(
        "CREATE TABLE accounts (id VARCHAR PRIMARY KEY, name VARCHAR);
         INSERT INTO accounts VALUES ('{A1}', 'alpha'), ('{A2}', 'beta'), ('{A3}', 'gamma');
         CREATE TABLE visitors (id VARCHAR PRIMARY KEY, updated_at TIMESTAMP);
         INSERT INTO visitors VALUES
           ('v-old', TIMESTAMP '2022-12-31 12:00:00'),
           ('v-mid', TIMESTAMP '2023-01-02 00:00:00'),
           ('v-new', TIMESTAMP '2023-01-03 00:00:00');"
    ))
    .unwrap();
    db
}

fn accounts_entry() -> CatalogEntry {
    let mut schema = JsonSchema::new();
    schema.add_property("id", SchemaProperty::new(JsonType::String));
    schema.add_property("name", SchemaProperty::nullable(JsonType::String));
    CatalogEntry::new("accounts", "accounts", schema)
        .with_table("main.accounts")
        .with_metadata(&[], "selected", json!(true))
        .with_metadata(&[], "replication-method", json!("FULL_TABLE"))
        .with_metadata(&[], "table-key-properties", json!(["id"]))
}

fn visitors_entry() -> CatalogEntry {
    let mut schema = JsonSchema::new();
    schema.add_property("id", SchemaProperty::new(JsonType::String));
    schema.add_property(
        "updated_at",
        SchemaProperty::nullable(JsonType::String).with_format("date-time"),
    );
    CatalogEntry::new("visitors", "visitors", schema)
        .with_table("main.visitors")
        .with_metadata(&[], "selected", json!(true))
        .with_metadata(&[], "replication-method", json!("INCREMENTAL"))
        .with_metadata(&[], "replication-key", json!("updated_at"))
        .with_metadata(&[], "table-key-properties", json!(["id"]))
}

fn visitors_bookmarked() -> State {
    State::new()
        .write_bookmark(
            "visitors",
            BookmarkUpdate::ReplicationKey(Some("updated_at".to_string())),
        )
        .write_bookmark(
            "visitors",
            BookmarkUpdate::ReplicationKeyValue(Some(json!("2023-01-01T00:00:00Z"))),
        )
}

fn kinds(messages: &[Message]) -> Vec<&'static str> {
    messages.iter().map(Message::kind).collect()
}

#[tokio::test]
async fn test_two_stream_scenario() {
    let db = seeded_db();
    let catalog = Catalog::new(vec![accounts_entry(), visitors_entry()]);
    let mut out: Vec<Message> = Vec::new();

    let mut engine = SyncEngine::new(&db);
    let state = engine
        .sync(&catalog, visitors_bookmarked(), &mut out)
        .await
        .unwrap();

    assert_eq!(
        kinds(&out),
        vec![
            "STATE",
            "ACTIVATE_VERSION",
            "SCHEMA",
            "VOLUME",
            "RECORD",
            "RECORD",
            "RECORD",
            "ACTIVATE_VERSION",
            "STATE",
            "STATE",
            "SCHEMA",
            "VOLUME",
            "RECORD",
            "RECORD",
            "STATE",
            "STATE",
        ]
    );

    // both activations carry the same version
    let versions: Vec<i64> = out
        .iter()
        .filter_map(|m| match m {
            Message::ActivateVersion(a) => Some(a.version),
            _ => None,
        })
        .collect();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0], versions[1]);

    let visitor_ids: Vec<&JsonValue> = out
        .iter()
        .filter_map(|m| match m {
            Message::Record(r) if r.stream == "visitors" => r.record.get("id"),
            _ => None,
        })
        .collect();
    assert_eq!(visitor_ids, vec![&json!("v-mid"), &json!("v-new")]);

    assert_eq!(state.version("accounts"), None);
    assert_eq!(
        state.replication_key_value("visitors"),
        Some(&json!("2023-01-03T00:00:00.000000Z"))
    );
    assert_eq!(state.currently_syncing, None);
    assert_eq!(out.last(), Some(&Message::state(state.to_value())));

    let stats = engine.stats();
    assert_eq!(stats.streams_synced, 2);
    assert_eq!(stats.records_synced, 5);
}

#[tokio::test]
async fn test_first_incremental_sync_activates_and_uses_start_date() {
    let db = seeded_db();
    let catalog = Catalog::new(vec![visitors_entry()]);
    let mut out: Vec<Message> = Vec::new();

    let start = parse_timestamp("2023-01-02T12:00:00Z").unwrap();
    let mut engine = SyncEngine::new(&db).with_config(SyncConfig::new().with_start_date(start));
    let state = engine.sync(&catalog, State::new(), &mut out).await.unwrap();

    assert_eq!(
        kinds(&out),
        vec!["STATE", "ACTIVATE_VERSION", "SCHEMA", "VOLUME", "RECORD", "STATE", "STATE"]
    );
    // incremental streams keep their version between runs
    assert!(state.version("visitors").is_some());
    assert_eq!(
        state.replication_key_value("visitors"),
        Some(&json!("2023-01-03T00:00:00.000000Z"))
    );
}

#[tokio::test]
async fn test_currently_syncing_marks_each_stream() {
    let db = seeded_db();
    let catalog = Catalog::new(vec![accounts_entry(), visitors_entry()]);
    let mut out: Vec<Message> = Vec::new();

    SyncEngine::new(&db)
        .sync(&catalog, visitors_bookmarked(), &mut out)
        .await
        .unwrap();

    let syncing: Vec<JsonValue> = out
        .iter()
        .filter_map(|m| match m {
            Message::State(s) => Some(s.value["currently_syncing"].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(syncing.first(), Some(&json!("accounts")));
    assert!(syncing.contains(&json!("visitors")));
    assert_eq!(syncing.last(), Some(&JsonValue::Null));
}

#[tokio::test]
async fn test_bookmark_is_monotonic_with_checkpoints() {
    let db = DuckDbSource::in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE visitors (id VARCHAR, updated_at TIMESTAMP);
         INSERT INTO visitors
           SELECT 'v' || i::VARCHAR, TIMESTAMP '2023-02-01 00:00:00' + to_minutes(i)
           FROM range(25) t(i);",
    )
    .unwrap();

    let catalog = Catalog::new(vec![visitors_entry()]);
    let mut out: Vec<Message> = Vec::new();
    let config = SyncConfig::new().with_checkpoint_interval(10);
    SyncEngine::new(&db)
        .with_config(config)
        .sync(&catalog, visitors_bookmarked(), &mut out)
        .await
        .unwrap();

    let records: Vec<String> = out
        .iter()
        .filter_map(|m| match m {
            Message::Record(r) => r.record["updated_at"].as_str().map(str::to_string),
            _ => None,
        })
        .collect();
    assert_eq!(records.len(), 25);
    assert!(records.windows(2).all(|w| w[0] <= w[1]));

    // start, two checkpoints, stream end, run end
    let states = out.iter().filter(|m| m.is_state()).count();
    assert_eq!(states, 5);
}

#[tokio::test]
async fn test_limit_caps_rows_and_volume() {
    let db = seeded_db();
    let catalog = Catalog::new(vec![accounts_entry()]);
    let mut out: Vec<Message> = Vec::new();

    SyncEngine::new(&db)
        .with_config(SyncConfig::new().with_limit(Some(2)))
        .sync(&catalog, State::new(), &mut out)
        .await
        .unwrap();

    assert!(out.contains(&Message::volume("accounts", 2)));
    assert_eq!(out.iter().filter(|m| m.is_record()).count(), 2);
}

#[tokio::test]
async fn test_key_filter_narrows_rows() {
    let db = seeded_db();
    let catalog = Catalog::new(vec![accounts_entry()]);
    let filter = StaticKeyFilter::new().with_keys("accounts", [A1, A3]);
    let config = SyncConfig::new().with_filter(
        "accounts",
        StreamFilterConfig {
            target_entity: "accounts".to_string(),
            target_primary_key: "accountId".to_string(),
            source_key: None,
        },
    );
    let mut out: Vec<Message> = Vec::new();

    SyncEngine::new(&db)
        .with_config(config)
        .with_key_filter(&filter)
        .sync(&catalog, State::new(), &mut out)
        .await
        .unwrap();

    let ids: Vec<&JsonValue> = out
        .iter()
        .filter_map(|m| match m {
            Message::Record(r) => r.record.get("id"),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![&json!(A1), &json!(A3)]);
    assert!(out.contains(&Message::volume("accounts", 2)));
}

#[tokio::test]
async fn test_empty_key_set_yields_no_rows() {
    let db = seeded_db();
    let catalog = Catalog::new(vec![accounts_entry()]);
    let filter = StaticKeyFilter::new().with_keys("accounts", Vec::<String>::new());
    let config = SyncConfig::new().with_filter(
        "accounts",
        StreamFilterConfig {
            target_entity: "accounts".to_string(),
            target_primary_key: "accountId".to_string(),
            source_key: Some("id".to_string()),
        },
    );
    let mut out: Vec<Message> = Vec::new();

    SyncEngine::new(&db)
        .with_config(config)
        .with_key_filter(&filter)
        .sync(&catalog, State::new(), &mut out)
        .await
        .unwrap();

    assert!(out.contains(&Message::volume("accounts", 0)));
    assert!(!out.iter().any(Message::is_record));
}

#[tokio::test]
async fn test_unavailable_key_filter_is_fatal_and_flushes_state() {
    let db = seeded_db();
    let catalog = Catalog::new(vec![accounts_entry()]);
    let filter = StaticKeyFilter::new();
    let config = SyncConfig::new().with_filter(
        "accounts",
        StreamFilterConfig {
            target_entity: "accounts".to_string(),
            target_primary_key: "accountId".to_string(),
            source_key: None,
        },
    );
    let mut out: Vec<Message> = Vec::new();

    let err = SyncEngine::new(&db)
        .with_config(config)
        .with_key_filter(&filter)
        .sync(&catalog, State::new(), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::KeyFilter { .. }));
    assert!(out.last().is_some_and(Message::is_state));
    assert!(!out.iter().any(Message::is_record));
}

#[tokio::test]
async fn test_query_failure_is_fatal() {
    let db = DuckDbSource::in_memory().unwrap();
    let catalog = Catalog::new(vec![accounts_entry()]);
    let mut out: Vec<Message> = Vec::new();

    let err = SyncEngine::new(&db)
        .sync(&catalog, State::new(), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Query { .. }));
    assert!(out.last().is_some_and(Message::is_state));
}

#[tokio::test]
async fn test_stream_without_columns_is_skipped() {
    let db = seeded_db();
    let entry = CatalogEntry::new("empty", "empty", JsonSchema::new())
        .with_metadata(&[], "selected", json!(true));
    let catalog = Catalog::new(vec![entry]);
    let mut out: Vec<Message> = Vec::new();

    let mut engine = SyncEngine::new(&db);
    engine.sync(&catalog, State::new(), &mut out).await.unwrap();

    assert_eq!(kinds(&out), vec!["STATE"]);
    assert_eq!(engine.stats().streams_skipped, 1);
}

#[test]
fn test_stream_query_rendering() {
    let db = DuckDbSource::in_memory().unwrap();
    let query = StreamQuery {
        table: "\"memory\".\"main\".\"visitors\"".to_string(),
        columns: vec!["id".to_string(), "updated_at".to_string()],
        key_filter: Some(("id".to_string(), vec!["a".to_string(), "b".to_string()])),
        cursor: Some(("updated_at".to_string(), QueryParam::from("2023-01-01"))),
        order_by: vec!["updated_at".to_string()],
        limit: Some(100),
    };

    let (sql, params) = query.select_sql(&db);
    assert_eq!(
        sql,
        "SELECT \"id\", \"updated_at\" FROM \"memory\".\"main\".\"visitors\" \
         WHERE \"updated_at\" > ? AND \"id\" IN (?, ?) ORDER BY \"updated_at\" ASC LIMIT 100"
    );
    assert_eq!(params.len(), 3);

    let (count, count_params) = query.count_sql(&db);
    assert!(count.starts_with("SELECT COUNT(*) FROM (SELECT"));
    assert_eq!(count_params, params);
}

#[test]
fn test_parse_timestamp_variants() {
    let expected = parse_timestamp("2023-01-01T00:00:00Z").unwrap();
    assert_eq!(parse_timestamp("2023-01-01T00:00:00.000000Z"), Some(expected));
    assert_eq!(parse_timestamp("2023-01-01T02:00:00+02:00"), Some(expected));
    assert_eq!(parse_timestamp("2023-01-01 00:00:00"), Some(expected));
    assert_eq!(parse_timestamp("2023-01-01"), Some(expected));
    assert_eq!(parse_timestamp("yesterday"), None);
}
