//! Configuration for both halves of the pipeline
//!
//! Config files are JSON (or YAML, chosen by file extension), read once at
//! startup and treated as read-only afterwards. Required keys are checked
//! before deserialization so a missing key is reported by name.

use crate::error::{Error, Result};
use crate::types::{JsonValue, OptionStringExt};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Format of `start_date` in the extract config
pub const START_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const EXTRACT_REQUIRED_KEYS: &[&str] = &[
    "host",
    "dbname",
    "user",
    "password",
    "start_date",
    "target_integration_key",
];

const LOAD_REQUIRED_KEYS: &[&str] = &["integration_key"];

// ============================================================================
// Loading
// ============================================================================

/// Read a config file into a raw JSON value
pub fn read_config_value(path: impl AsRef<Path>) -> Result<JsonValue> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            Error::config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        }
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        Ok(serde_yaml::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

/// Verify every required key is present at the top level
pub fn check_required(value: &JsonValue, required: &[&str]) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::config("Config must be a JSON object"))?;

    match required.iter().find(|key| !obj.contains_key(**key)) {
        Some(key) => Err(Error::missing_field(*key)),
        None => Ok(()),
    }
}

// ============================================================================
// Extract Config
// ============================================================================

/// Warehouse connection and extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub dbname: String,

    pub user: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// Database schema holding the replicated tables
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Initial cursor for incremental streams, `%Y-%m-%dT%H:%M:%SZ`
    pub start_date: String,

    /// Destination credential used by the key pre-filter
    #[serde(skip_serializing)]
    pub target_integration_key: String,

    /// Destination aggregation endpoint
    #[serde(default)]
    pub aggregation_url: Option<String>,

    /// Key pre-filter settings per stream
    #[serde(default)]
    pub streams: BTreeMap<String, StreamFilterConfig>,

    /// Hard row cap per stream per invocation
    #[serde(default)]
    pub limit: Option<u64>,
}

fn default_port() -> u16 {
    5439
}

fn default_schema() -> String {
    "public".to_string()
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            dbname: String::new(),
            user: String::new(),
            password: String::new(),
            schema: default_schema(),
            start_date: "2000-01-01T00:00:00Z".to_string(),
            target_integration_key: String::new(),
            aggregation_url: None,
            streams: BTreeMap::new(),
            limit: None,
        }
    }
}

impl ExtractConfig {
    /// Load and validate from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_value(read_config_value(path)?)
    }

    /// Validate and deserialize a raw config value
    pub fn from_value(value: JsonValue) -> Result<Self> {
        check_required(&value, EXTRACT_REQUIRED_KEYS)?;
        let config: Self = serde_json::from_value(value)?;
        config.start_date()?;
        Ok(config)
    }

    /// Parsed `start_date`
    pub fn start_date(&self) -> Result<DateTime<Utc>> {
        parse_start_date(&self.start_date)
    }

    /// Aggregation endpoint, falling back to the destination default
    pub fn aggregation_url(&self) -> String {
        self.aggregation_url
            .clone()
            .none_if_empty()
            .unwrap_or_else(|| format!("{}/api/v1/aggregation", default_base_url()))
    }

    /// Override the row cap
    #[must_use]
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        if limit.is_some() {
            self.limit = limit;
        }
        self
    }
}

/// Parse a start date in the configured format, accepting RFC 3339 as well
pub fn parse_start_date(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, START_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc)))
        .map_err(|e| Error::InvalidConfigValue {
            field: "start_date".to_string(),
            message: format!("'{value}' is not {START_DATE_FORMAT}: {e}"),
        })
}

/// Which destination entity keys a stream is narrowed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFilterConfig {
    /// Destination entity queried for valid keys (e.g. `accounts`)
    pub target_entity: String,

    /// Key field on the destination entity (e.g. `accountId`)
    pub target_primary_key: String,

    /// Warehouse column matched against the keys; defaults to the stream's first key property
    #[serde(default)]
    pub source_key: Option<String>,
}

// ============================================================================
// Load Config
// ============================================================================

/// Destination settings and per-stream field mappings
///
/// Every key other than the named settings is a stream entry; together they
/// form the closed set of streams a delivery run is responsible for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(skip_serializing)]
    pub integration_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(flatten)]
    pub streams: BTreeMap<String, StreamTargetConfig>,
}

fn default_base_url() -> String {
    "https://app.pendo.io".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

impl LoadConfig {
    /// Create a config with no streams
    pub fn new(integration_key: impl Into<String>) -> Self {
        Self {
            integration_key: integration_key.into(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            streams: BTreeMap::new(),
        }
    }

    /// Load and validate from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_value(read_config_value(path)?)
    }

    /// Validate and deserialize a raw config value
    pub fn from_value(value: JsonValue) -> Result<Self> {
        check_required(&value, LOAD_REQUIRED_KEYS)?;
        let config: Self = serde_json::from_value(value)?;
        if config.streams.is_empty() {
            return Err(Error::config("Load config declares no streams"));
        }
        url::Url::parse(&config.base_url)?;
        Ok(config)
    }

    /// Add a stream entry
    #[must_use]
    pub fn with_stream(mut self, name: impl Into<String>, stream: StreamTargetConfig) -> Self {
        self.streams.insert(name.into(), stream);
        self
    }

    /// Set the destination base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Look up a stream entry
    pub fn stream(&self, name: &str) -> Result<&StreamTargetConfig> {
        self.streams.get(name).ok_or_else(|| {
            Error::config(format!("Stream '{name}' has no entry in the load config"))
        })
    }

    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-stream destination shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTargetConfig {
    /// Destination primary key attribute
    pub primary_key: String,

    /// Destination attribute -> source attribute, applied in file order
    #[serde(default)]
    pub field_mappings: FieldMappings,
}

impl StreamTargetConfig {
    /// Create a stream entry
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            field_mappings: FieldMappings::default(),
        }
    }

    /// Add a field mapping
    #[must_use]
    pub fn with_mapping(mut self, target: impl Into<String>, source: impl Into<String>) -> Self {
        self.field_mappings.0.push((target.into(), source.into()));
        self
    }
}

/// Ordered list of `(target, source)` attribute pairs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMappings(pub Vec<(String, String)>);

impl FieldMappings {
    /// Iterate `(target, source)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(t, s)| (t.as_str(), s.as_str()))
    }

    /// Check if there are no mappings
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for FieldMappings {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(t, s)| (t, s)))
    }
}

impl<'de> Deserialize<'de> for FieldMappings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = FieldMappings;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of destination attribute to source attribute")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((target, source)) = map.next_entry::<String, String>()? {
                    pairs.push((target, source));
                }
                Ok(FieldMappings(pairs))
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}

// ============================================================================
// Delivery Limits
// ============================================================================

/// Batch and request constraints for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryLimits {
    /// Flush once a batch's serialized size reaches this many bytes
    pub max_bytes: usize,
    /// Flush once a batch holds this many records
    pub max_records: usize,
    /// Courtesy sleep after each successful response
    pub request_delay: Duration,
    /// Maximum requests in flight
    pub max_concurrent: usize,
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Calls allowed per rate window
    pub rate_calls: u32,
    /// Length of the rate window
    pub rate_period: Duration,
}

impl Default for DeliveryLimits {
    fn default() -> Self {
        Self {
            max_bytes: 5_000_000,
            max_records: 500,
            request_delay: Duration::ZERO,
            max_concurrent: 10,
            max_attempts: 5,
            rate_calls: 1_800,
            rate_period: Duration::from_secs(300),
        }
    }
}

impl DeliveryLimits {
    /// Set max batch bytes
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    /// Set max batch records
    #[must_use]
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    /// Set the post-response delay
    #[must_use]
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Set the in-flight request cap
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set total attempts per request
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the rate window
    #[must_use]
    pub fn with_rate(mut self, calls: u32, period: Duration) -> Self {
        self.rate_calls = calls.max(1);
        self.rate_period = period;
        self
    }
}
