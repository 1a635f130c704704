//! Destination wire types

use crate::http::HttpClientConfig;
use crate::types::{key_string, JsonValue};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Header carrying the destination credential
pub const INTEGRATION_KEY_HEADER: &str = "X-Pendo-Integration-Key";

/// Client config carrying the destination's standard headers
pub fn destination_client_config(integration_key: &str, timeout: Duration) -> HttpClientConfig {
    HttpClientConfig::builder()
        .timeout(timeout)
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .header(INTEGRATION_KEY_HEADER, integration_key)
        .build()
}

/// Result of one bulk update request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkUpdateResponse {
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<RecordError>,
}

impl BulkUpdateResponse {
    /// Check if any record in the batch was rejected
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || !self.errors.is_empty()
    }

    /// Ids of rejected records
    pub fn failed_ids(&self) -> impl Iterator<Item = String> + '_ {
        self.errors.iter().map(RecordError::id_string)
    }
}

/// One rejected record
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordError {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub message: String,
}

impl RecordError {
    /// Id rendered for key comparison
    pub fn id_string(&self) -> String {
        key_string(&self.id)
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
