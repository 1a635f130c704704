//! Valid-key lookups against the destination's aggregation API

use super::types::destination_client_config;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Supplies the set of destination keys extraction is narrowed to
#[async_trait]
pub trait KeyFilter: Send + Sync {
    /// Fetch every valid key of `entity`, read from its `key_field`
    async fn fetch_valid_keys(&self, entity: &str, key_field: &str) -> Result<BTreeSet<String>>;
}

#[derive(Debug, Deserialize)]
struct AggregationResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// Key filter backed by the aggregation endpoint.
///
/// Only keys shaped like UUIDs are kept; other keys belong to entities that
/// have not been active since the destination key was migrated.
#[derive(Debug)]
pub struct AggregationKeyFilter {
    client: HttpClient,
    url: String,
}

impl AggregationKeyFilter {
    /// Create a filter posting to `url` with the given credential
    pub fn new(url: impl Into<String>, integration_key: &str, timeout: Duration) -> Result<Self> {
        let client = HttpClient::with_config(destination_client_config(integration_key, timeout))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Aggregation request selecting 36-character values of `key_field`
    pub fn pipeline(entity: &str, key_field: &str) -> Value {
        let mut source = serde_json::Map::new();
        source.insert(entity.to_string(), Value::Null);
        let mut select = serde_json::Map::new();
        select.insert(key_field.to_string(), Value::String(key_field.to_string()));

        json!({
            "response": {"mimeType": "application/json"},
            "request": {
                "pipeline": [
                    {"source": source},
                    {"filter": format!("len({key_field}) == 36")},
                    {"select": select}
                ]
            }
        })
    }
}

#[async_trait]
impl KeyFilter for AggregationKeyFilter {
    async fn fetch_valid_keys(&self, entity: &str, key_field: &str) -> Result<BTreeSet<String>> {
        info!(entity = %entity, key = %key_field, "Fetching valid keys");
        let response: AggregationResponse = self
            .client
            .post_json(&self.url, Self::pipeline(entity, key_field))
            .await
            .map_err(|e| Error::key_filter(entity, e.to_string()))?;

        let total = response.results.len();
        let keys: BTreeSet<String> = response
            .results
            .iter()
            .filter_map(|row| row.get(key_field).and_then(Value::as_str))
            .filter(|key| is_uuid(key))
            .map(str::to_string)
            .collect();

        debug!(entity = %entity, returned = total, kept = keys.len(), "Filtered keys");
        Ok(keys)
    }
}

fn is_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

/// Fixed key sets per entity
#[derive(Debug, Clone, Default)]
pub struct StaticKeyFilter {
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl StaticKeyFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the keys for an entity
    #[must_use]
    pub fn with_keys<I, S>(mut self, entity: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys
            .insert(entity.into(), keys.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl KeyFilter for StaticKeyFilter {
    async fn fetch_valid_keys(&self, entity: &str, _key_field: &str) -> Result<BTreeSet<String>> {
        self.keys
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::key_filter(entity, "no keys registered"))
    }
}
