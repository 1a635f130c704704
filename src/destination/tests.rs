//! Destination tests

use super::*;
use crate::error::Error;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use test_case::test_case;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test_case("accounts", "account" ; "account stream")]
#[test_case("visitor_traits", "visitor" ; "visitor stream")]
#[test_case("account_visitors", "visitor" ; "last kind wins")]
fn test_endpoint_routing(stream: &str, kind: &str) {
    let endpoint = Endpoint::for_stream(stream).unwrap();
    assert_eq!(endpoint.kind, kind);
    assert_eq!(endpoint.path, format!("/api/v1/metadata/{kind}/custom/value"));
}

#[test]
fn test_endpoint_unknown_kind() {
    let err = Endpoint::for_stream("orders").unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn test_endpoint_url() {
    let endpoint = Endpoint::for_stream("accounts").unwrap();
    assert_eq!(
        endpoint.url("https://app.example.com/"),
        "https://app.example.com/api/v1/metadata/account/custom/value"
    );
}

#[test]
fn test_bulk_update_response_parsing() {
    let response: BulkUpdateResponse = serde_json::from_value(json!({
        "total": 3,
        "updated": 2,
        "failed": 1,
        "errors": [{"id": "b", "message": "bad value"}]
    }))
    .unwrap();
    assert!(response.has_failures());
    assert_eq!(response.failed_ids().collect::<Vec<_>>(), vec!["b".to_string()]);

    let clean: BulkUpdateResponse =
        serde_json::from_value(json!({"total": 1, "updated": 1, "failed": 0, "errors": null}))
            .unwrap();
    assert!(!clean.has_failures());
}

#[test]
fn test_aggregation_pipeline_shape() {
    assert_eq!(
        AggregationKeyFilter::pipeline("accounts", "accountId"),
        json!({
            "response": {"mimeType": "application/json"},
            "request": {"pipeline": [
                {"source": {"accounts": null}},
                {"filter": "len(accountId) == 36"},
                {"select": {"accountId": "accountId"}}
            ]}
        })
    );
}

#[tokio::test]
async fn test_aggregation_filter_keeps_uuids() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/aggregation"))
        .and(header(INTEGRATION_KEY_HEADER, "int-key"))
        .and(body_json(AggregationKeyFilter::pipeline("visitors", "visitorId")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"visitorId": "6f1c2d3e-4b5a-4c7d-8e9f-0a1b2c3d4e5f"},
                {"visitorId": "not-a-uuid-but-exactly-36-characters"},
                {"visitorId": 42},
                {"other": "x"}
            ]
        })))
        .mount(&server)
        .await;

    let filter = AggregationKeyFilter::new(
        format!("{}/api/v1/aggregation", server.uri()),
        "int-key",
        Duration::from_secs(5),
    )
    .unwrap();
    let keys = filter.fetch_valid_keys("visitors", "visitorId").await.unwrap();

    assert_eq!(
        keys.into_iter().collect::<Vec<_>>(),
        vec!["6f1c2d3e-4b5a-4c7d-8e9f-0a1b2c3d4e5f".to_string()]
    );
}

#[tokio::test]
async fn test_aggregation_filter_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let filter = AggregationKeyFilter::new(server.uri(), "bad", Duration::from_secs(5)).unwrap();
    let err = filter.fetch_valid_keys("accounts", "accountId").await.unwrap_err();
    assert!(matches!(err, Error::KeyFilter { .. }));
}

#[tokio::test]
async fn test_static_key_filter() {
    let filter = StaticKeyFilter::new().with_keys("accounts", ["a", "b"]);
    assert_eq!(filter.fetch_valid_keys("accounts", "id").await.unwrap().len(), 2);
    assert!(filter.fetch_valid_keys("visitors", "id").await.is_err());
}
