//! Catalog types
//!
//! A catalog is an ordered list of stream definitions plus Singer-style
//! breadcrumb metadata. Stream-level metadata lives at the empty breadcrumb,
//! column-level metadata at `["properties", <column>]`.

use crate::error::{Error, Result, ResultExt};
use crate::schema::{Inclusion, JsonSchema};
use crate::types::{JsonObject, JsonValue, ReplicationMethod};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered set of streams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    /// Create a catalog from entries
    pub fn new(streams: Vec<CatalogEntry>) -> Self {
        Self { streams }
    }

    /// Load a catalog from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog '{}'", path.display()))?;
        Self::from_json(&contents)
    }

    /// Parse a catalog from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("Invalid catalog: {e}")))
    }

    /// Find an entry by tap stream id
    pub fn get_stream(&self, tap_stream_id: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|s| s.tap_stream_id == tap_stream_id)
    }

    /// Entries marked selected
    pub fn selected_streams(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.streams.iter().filter(|s| s.is_selected())
    }
}

/// One breadcrumb/metadata pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    #[serde(default)]
    pub breadcrumb: Vec<String>,
    #[serde(default)]
    pub metadata: JsonObject,
}

/// Stream definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    pub stream: String,
    /// Schema-qualified table name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default)]
    pub schema: JsonSchema,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl CatalogEntry {
    /// Create an entry with no metadata
    pub fn new(tap_stream_id: impl Into<String>, stream: impl Into<String>, schema: JsonSchema) -> Self {
        Self {
            tap_stream_id: tap_stream_id.into(),
            stream: stream.into(),
            table_name: None,
            database_name: None,
            schema,
            metadata: Vec::new(),
        }
    }

    /// Set the qualified table name
    #[must_use]
    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Write one metadata value at a breadcrumb
    #[must_use]
    pub fn with_metadata(mut self, breadcrumb: &[&str], key: &str, value: JsonValue) -> Self {
        self.write_metadata(breadcrumb, key, value);
        self
    }

    /// Write one metadata value at a breadcrumb, creating the entry if needed
    pub fn write_metadata(&mut self, breadcrumb: &[&str], key: &str, value: JsonValue) {
        let crumb: Vec<String> = breadcrumb.iter().map(ToString::to_string).collect();
        match self.metadata.iter_mut().find(|m| m.breadcrumb == crumb) {
            Some(entry) => {
                entry.metadata.insert(key.to_string(), value);
            }
            None => {
                let mut metadata = JsonObject::new();
                metadata.insert(key.to_string(), value);
                self.metadata.push(MetadataEntry {
                    breadcrumb: crumb,
                    metadata,
                });
            }
        }
    }

    /// Metadata map at a breadcrumb
    pub fn metadata_at(&self, breadcrumb: &[&str]) -> Option<&JsonObject> {
        self.metadata
            .iter()
            .find(|m| {
                m.breadcrumb.len() == breadcrumb.len()
                    && m.breadcrumb.iter().zip(breadcrumb).all(|(a, b)| a == b)
            })
            .map(|m| &m.metadata)
    }

    /// Stream-level metadata value
    pub fn stream_metadata(&self, key: &str) -> Option<&JsonValue> {
        self.metadata_at(&[])?.get(key)
    }

    /// Column-level metadata value
    pub fn column_metadata(&self, column: &str, key: &str) -> Option<&JsonValue> {
        self.metadata_at(&["properties", column])?.get(key)
    }

    /// Whether the stream is selected for sync
    pub fn is_selected(&self) -> bool {
        self.stream_metadata("selected")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    /// Whether the source table is a view
    pub fn is_view(&self) -> bool {
        self.stream_metadata("is-view")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    /// Replication cursor column, if any
    pub fn replication_key(&self) -> Option<&str> {
        self.stream_metadata("replication-key").and_then(JsonValue::as_str)
    }

    /// Replication method; a stream without one replicates incrementally
    /// when it declares a cursor column and as a full table otherwise
    pub fn replication_method(&self) -> ReplicationMethod {
        self.stream_metadata("replication-method")
            .and_then(JsonValue::as_str)
            .and_then(ReplicationMethod::parse)
            .unwrap_or(if self.replication_key().is_some() {
                ReplicationMethod::Incremental
            } else {
                ReplicationMethod::FullTable
            })
    }

    /// Primary key columns (view or table flavour)
    pub fn key_properties(&self) -> Vec<String> {
        let key = if self.is_view() {
            "view-key-properties"
        } else {
            "table-key-properties"
        };
        self.stream_metadata(key)
            .and_then(JsonValue::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(JsonValue::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Columns to extract: selected or automatic, never unsupported
    pub fn selected_columns(&self) -> Vec<String> {
        self.schema
            .properties
            .iter()
            .filter(|(name, prop)| {
                let inclusion = self
                    .column_metadata(name, "inclusion")
                    .and_then(|v| serde_json::from_value::<Inclusion>(v.clone()).ok())
                    .or(prop.inclusion);
                match inclusion {
                    Some(Inclusion::Unsupported) => false,
                    Some(Inclusion::Automatic) => true,
                    _ => self
                        .column_metadata(name, "selected")
                        .or_else(|| self.column_metadata(name, "selected-by-default"))
                        .and_then(JsonValue::as_bool)
                        .unwrap_or(true),
                }
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Table name with its schema qualifier split off
    pub fn table_parts(&self) -> (Option<&str>, &str) {
        let table = self.table_name.as_deref().unwrap_or(&self.stream);
        match table.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, table),
        }
    }
}
