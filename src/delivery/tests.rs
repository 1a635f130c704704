//! Delivery engine tests

use super::*;
use crate::batch::{Batch, FlushReason};
use crate::config::{DeliveryLimits, LoadConfig, StreamTargetConfig};
use crate::destination::destination_client_config;
use crate::error::Error;
use crate::http::HttpClient;
use crate::types::JsonObject;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const ACCOUNT_PATH: &str = "/api/v1/metadata/account/custom/value";

fn load_config(base_url: &str) -> LoadConfig {
    LoadConfig::new("int-key")
        .with_base_url(base_url)
        .with_stream("accounts", StreamTargetConfig::new("accountId"))
        .with_stream("visitors", StreamTargetConfig::new("visitorId"))
}

fn engine(config: LoadConfig, limits: &DeliveryLimits) -> DeliveryEngine {
    let mut http = destination_client_config(&config.integration_key, Duration::from_secs(5));
    http.max_attempts = limits.max_attempts;
    http.initial_backoff = Duration::from_millis(1);
    http.max_backoff = Duration::from_millis(5);
    http.rate_limit = None;
    let client = HttpClient::with_config(http).unwrap();
    DeliveryEngine::with_client(config, limits, Arc::new(client))
}

fn account(i: usize) -> JsonObject {
    match json!({"accountId": format!("a-{i}"), "values": {"n": i}}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn batch(stream: &str, index: usize, range: std::ops::Range<usize>) -> Batch {
    let records: Vec<JsonObject> = range.map(account).collect();
    Batch {
        stream: stream.to_string(),
        index,
        bytes: records.iter().map(crate::batch::record_size).sum(),
        records,
        reason: FlushReason::RecordLimit,
    }
}

fn sent_records(request: &Request) -> Vec<Value> {
    serde_json::from_slice(&request.body).unwrap()
}

/// Accepts every record in the request
fn accept_all(request: &Request) -> ResponseTemplate {
    let n = sent_records(request).len();
    ResponseTemplate::new(200).set_body_json(json!({
        "failed": 0, "updated": n, "total": n, "errors": []
    }))
}

/// Rejects record `a-2` whenever it is sent
fn reject_a2(request: &Request) -> ResponseTemplate {
    let records = sent_records(request);
    let n = records.len();
    let bad = records.iter().any(|r| r["accountId"] == "a-2");
    if bad {
        ResponseTemplate::new(200).set_body_json(json!({
            "failed": 1, "updated": n - 1, "total": n,
            "errors": [{"id": "a-2", "message": "invalid value"}]
        }))
    } else {
        accept_all(request)
    }
}

// ============================================================================
// Completion tracker
// ============================================================================

#[test]
fn test_tracker_closure() {
    let tracker = CompletionTracker::new(["accounts", "visitors"]);
    assert_eq!(tracker.len(), 2);
    assert!(!tracker.is_complete());

    assert!(!tracker.mark_complete("accounts"));
    assert!(!tracker.mark_complete("orders"));
    assert_eq!(tracker.missing(), vec!["visitors".to_string()]);
    assert!(tracker.is_stream_complete("accounts"));

    assert!(tracker.mark_complete("visitors"));
    assert!(tracker.is_complete());
    assert!(tracker.missing().is_empty());
}

#[test]
fn test_tracker_empty_run_is_complete() {
    let tracker = CompletionTracker::new(Vec::<String>::new());
    assert!(tracker.is_empty());
    assert!(tracker.is_complete());
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_deliver_batches_and_close() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .and(header("X-Pendo-Integration-Key", "int-key"))
        .and(header("Content-Type", "application/json"))
        .respond_with(accept_all)
        .expect(3)
        .mount(&server)
        .await;

    let mut engine = engine(load_config(&server.uri()), &DeliveryLimits::default());
    let outcome = engine
        .deliver(vec![
            batch("accounts", 1, 0..500),
            batch("accounts", 2, 500..1000),
            batch("accounts", 3, 1000..1050),
        ])
        .await
        .unwrap();

    let stats = outcome.stream("accounts").unwrap();
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.records, 1050);
    assert_eq!(stats.updated, 1050);
    assert_eq!(stats.total, 1050);
    assert_eq!(stats.request_times.len(), 3);
    assert_eq!(stats.retried, 0);

    // visitors never delivered
    assert!(!outcome.complete);
    assert_eq!(engine.tracker().missing(), vec!["visitors".to_string()]);
}

#[tokio::test]
async fn test_rejected_records_retried_once() {
    let server = MockServer::start().await;
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(move |request: &Request| {
            // only the first request rejects a-2
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                reject_a2(request)
            } else {
                accept_all(request)
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let mut engine = engine(load_config(&server.uri()), &DeliveryLimits::default());
    engine.dispatch(batch("accounts", 1, 0..5)).await.unwrap();
    let stats = engine.close_stream("accounts").await.unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.terminal_failures, 0);
    assert_eq!(stats.updated, 5);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(sent_records(&requests[1]), vec![json!({"accountId": "a-2", "values": {"n": 2}})]);
    assert!(engine.tracker().is_stream_complete("accounts"));
}

#[tokio::test]
async fn test_residual_failures_are_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(reject_a2)
        .expect(2)
        .mount(&server)
        .await;

    let mut engine = engine(load_config(&server.uri()), &DeliveryLimits::default());
    engine.dispatch(batch("accounts", 1, 0..4)).await.unwrap();
    let stats = engine.close_stream("accounts").await.unwrap();

    assert_eq!(stats.retried, 1);
    assert_eq!(stats.terminal_failures, 1);
    assert_eq!(stats.updated, 3);
    assert!(engine.tracker().is_stream_complete("accounts"));
}

/// Rejects every record in the request
fn reject_all(request: &Request) -> ResponseTemplate {
    let records = sent_records(request);
    let errors: Vec<Value> = records
        .iter()
        .map(|r| json!({"id": r["accountId"], "message": "invalid value"}))
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({
        "failed": records.len(), "updated": 0, "total": records.len(), "errors": errors
    }))
}

#[tokio::test]
async fn test_retry_pass_respects_batch_limits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(reject_all)
        .expect(6)
        .mount(&server)
        .await;

    let limits = DeliveryLimits::default().with_max_records(2);
    let mut engine = engine(load_config(&server.uri()), &limits);
    engine.dispatch(batch("accounts", 1, 0..2)).await.unwrap();
    engine.dispatch(batch("accounts", 2, 2..4)).await.unwrap();
    engine.dispatch(batch("accounts", 3, 4..6)).await.unwrap();
    let stats = engine.close_stream("accounts").await.unwrap();

    assert_eq!(stats.failed, 6);
    assert_eq!(stats.retried, 6);
    assert_eq!(stats.terminal_failures, 6);
    assert_eq!(stats.request_times.len(), 6);

    let requests = server.received_requests().await.unwrap();
    let sizes: Vec<usize> = requests.iter().map(|r| sent_records(r).len()).collect();
    assert_eq!(sizes, vec![2; 6]);

    // every record is retried exactly once
    let mut retried: Vec<Value> = requests[3..]
        .iter()
        .flat_map(|r| sent_records(r))
        .map(|r| r["accountId"].clone())
        .collect();
    retried.sort_by_key(|id| id.as_str().unwrap_or_default().to_string());
    let expected: Vec<Value> = (0..6).map(|i| json!(format!("a-{i}"))).collect();
    assert_eq!(retried, expected);
}

#[tokio::test]
async fn test_retry_pass_respects_byte_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(reject_all)
        .mount(&server)
        .await;

    // room for two records per request
    let size = crate::batch::record_size(&account(0));
    let limits = DeliveryLimits::default().with_max_bytes(size * 3);
    let mut engine = engine(load_config(&server.uri()), &limits);
    engine.dispatch(batch("accounts", 1, 0..2)).await.unwrap();
    engine.dispatch(batch("accounts", 2, 2..4)).await.unwrap();
    let stats = engine.close_stream("accounts").await.unwrap();
    assert_eq!(stats.terminal_failures, 4);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    for request in &requests[2..] {
        let records: Vec<JsonObject> = serde_json::from_slice(&request.body).unwrap();
        let bytes: usize = records.iter().map(crate::batch::record_size).sum();
        assert!(bytes < size * 3);
    }
}

#[tokio::test]
async fn test_client_error_is_fatal_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut engine = engine(load_config(&server.uri()), &DeliveryLimits::default());
    engine.dispatch(batch("accounts", 1, 0..3)).await.unwrap();
    let err = engine.close_stream("accounts").await.unwrap_err();

    assert!(matches!(err, Error::Delivery { .. }));
    assert!(err.to_string().contains("404"));
    assert!(!engine.tracker().is_stream_complete("accounts"));
}

#[tokio::test]
async fn test_server_errors_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(accept_all)
        .expect(1)
        .mount(&server)
        .await;

    let mut engine = engine(load_config(&server.uri()), &DeliveryLimits::default());
    engine.dispatch(batch("accounts", 1, 0..2)).await.unwrap();
    let stats = engine.close_stream("accounts").await.unwrap();
    assert_eq!(stats.updated, 2);
}

#[tokio::test]
async fn test_close_without_batches_marks_complete() {
    let mut engine = engine(load_config("http://127.0.0.1:9"), &DeliveryLimits::default());
    let stats = engine.close_stream("visitors").await.unwrap();
    assert_eq!(stats, StreamDeliveryStats::new("visitors"));
    assert!(engine.tracker().is_stream_complete("visitors"));
}

#[tokio::test]
async fn test_unroutable_stream_is_config_error() {
    let config = LoadConfig::new("int-key")
        .with_base_url("http://127.0.0.1:9")
        .with_stream("orders", StreamTargetConfig::new("orderId"));
    let mut engine = engine(config, &DeliveryLimits::default());
    let err = engine.dispatch(batch("orders", 1, 0..1)).await.unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_in_flight_requests_are_capped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(move |request: &Request| {
            accept_all(request).set_delay(Duration::from_millis(100))
        })
        .expect(3)
        .mount(&server)
        .await;

    let limits = DeliveryLimits::default().with_max_concurrent(1);
    let mut engine = engine(load_config(&server.uri()), &limits);
    let started = Instant::now();
    for i in 0..3 {
        engine.dispatch(batch("accounts", i + 1, i..i + 1)).await.unwrap();
    }
    engine.close_stream("accounts").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_request_delay_after_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(accept_all)
        .mount(&server)
        .await;

    let limits = DeliveryLimits::default().with_request_delay(Duration::from_millis(150));
    let mut engine = engine(load_config(&server.uri()), &limits);
    let started = Instant::now();
    engine.dispatch(batch("accounts", 1, 0..1)).await.unwrap();
    engine.close_stream("accounts").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_peak_in_flight_stays_under_cap() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ACCOUNT_PATH))
        .respond_with(move |request: &Request| {
            accept_all(request).set_delay(Duration::from_millis(300))
        })
        .expect(6)
        .mount(&server)
        .await;

    let limits = DeliveryLimits::default().with_max_concurrent(3);
    let mut engine = engine(load_config(&server.uri()), &limits);
    let started = Instant::now();
    let mut peak = 0;
    for i in 0..6 {
        engine.dispatch(batch("accounts", i + 1, i..i + 1)).await.unwrap();
        peak = peak.max(engine.in_flight());
    }
    // the fourth dispatch had to wait for a slot
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(peak, 3);

    engine.close_stream("accounts").await.unwrap();
    assert_eq!(engine.in_flight(), 0);
}
