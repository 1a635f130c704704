//! Protocol message types
//!
//! Messages are immutable once constructed and compare structurally.

use crate::types::{JsonObject, JsonValue};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// A message on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// One row of a stream
    Record(RecordMessage),
    /// Declares the shape and keys of a stream
    Schema(SchemaMessage),
    /// Checkpoint of replication progress
    State(StateMessage),
    /// Cut over a stream to the given version
    ActivateVersion(ActivateVersionMessage),
    /// Number of records about to follow for a stream
    Volume(VolumeMessage),
}

/// RECORD message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordMessage {
    pub stream: String,
    pub record: JsonObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_time_extracted"
    )]
    pub time_extracted: Option<DateTime<Utc>>,
}

/// SCHEMA message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: JsonValue,
    pub key_properties: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark_properties: Option<Vec<String>>,
}

/// STATE message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMessage {
    pub value: JsonValue,
}

/// ACTIVATE_VERSION message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: i64,
}

/// VOLUME message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeMessage {
    pub stream: String,
    pub count: u64,
}

fn serialize_time_extracted<S: Serializer>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        None => serializer.serialize_none(),
    }
}

impl Message {
    /// Create a record message
    pub fn record(
        stream: impl Into<String>,
        record: JsonObject,
        version: Option<i64>,
        time_extracted: Option<DateTime<Utc>>,
    ) -> Self {
        Self::Record(RecordMessage {
            stream: stream.into(),
            record,
            version,
            time_extracted,
        })
    }

    /// Create a schema message
    pub fn schema(
        stream: impl Into<String>,
        schema: JsonValue,
        key_properties: Vec<String>,
        bookmark_properties: Option<Vec<String>>,
    ) -> Self {
        Self::Schema(SchemaMessage {
            stream: stream.into(),
            schema,
            key_properties,
            bookmark_properties,
        })
    }

    /// Create a state message
    pub fn state(value: JsonValue) -> Self {
        Self::State(StateMessage { value })
    }

    /// Create an activate version message
    pub fn activate_version(stream: impl Into<String>, version: i64) -> Self {
        Self::ActivateVersion(ActivateVersionMessage {
            stream: stream.into(),
            version,
        })
    }

    /// Create a volume message
    pub fn volume(stream: impl Into<String>, count: u64) -> Self {
        Self::Volume(VolumeMessage {
            stream: stream.into(),
            count,
        })
    }

    /// Wire name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "RECORD",
            Self::Schema(_) => "SCHEMA",
            Self::State(_) => "STATE",
            Self::ActivateVersion(_) => "ACTIVATE_VERSION",
            Self::Volume(_) => "VOLUME",
        }
    }

    /// Stream this message belongs to (STATE has none)
    pub fn stream(&self) -> Option<&str> {
        match self {
            Self::Record(m) => Some(&m.stream),
            Self::Schema(m) => Some(&m.stream),
            Self::ActivateVersion(m) => Some(&m.stream),
            Self::Volume(m) => Some(&m.stream),
            Self::State(_) => None,
        }
    }

    /// Check if this is a record message
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// Check if this is a state message
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}
