//! State types for tracking replication progress
//!
//! State is emitted as the `value` of STATE messages and read back from the
//! `--state` file on the next run. Updates are pure: every write returns a new
//! `State` and leaves the original untouched.

use crate::error::{Error, Result};
use crate::types::JsonValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Replication progress across all streams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Per-stream bookmarks keyed by tap stream id
    #[serde(default)]
    pub bookmarks: BTreeMap<String, Bookmark>,

    /// Stream being extracted right now
    #[serde(default)]
    pub currently_syncing: Option<String>,
}

/// Progress for one stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Full-table cut-over token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,

    /// Cursor column the value below was recorded for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,

    /// Last cursor value emitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key_value: Option<JsonValue>,
}

impl Bookmark {
    /// A bookmark with neither a version nor a cursor value carries no progress
    pub fn is_empty(&self) -> bool {
        self.version.is_none() && self.replication_key_value.is_none()
    }
}

/// One bookmark field update
#[derive(Debug, Clone, PartialEq)]
pub enum BookmarkUpdate {
    Version(Option<i64>),
    ReplicationKey(Option<String>),
    ReplicationKeyValue(Option<JsonValue>),
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
        if contents.trim().is_empty() {
            return Ok(Self::new());
        }
        Self::from_json(&contents)
    }

    /// Parse state from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::state(format!("Failed to parse state JSON: {e}")))
    }

    /// State as a JSON value for a STATE message
    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Bookmark for a stream
    pub fn get_bookmark(&self, stream_id: &str) -> Option<&Bookmark> {
        self.bookmarks.get(stream_id)
    }

    /// Stored version for a stream
    pub fn version(&self, stream_id: &str) -> Option<i64> {
        self.get_bookmark(stream_id)?.version
    }

    /// Stored cursor value for a stream
    pub fn replication_key_value(&self, stream_id: &str) -> Option<&JsonValue> {
        self.get_bookmark(stream_id)?.replication_key_value.as_ref()
    }

    /// Stored cursor column for a stream
    pub fn replication_key(&self, stream_id: &str) -> Option<&str> {
        self.get_bookmark(stream_id)?.replication_key.as_deref()
    }

    /// True when the stream has no bookmark or one without progress
    pub fn bookmark_is_empty(&self, stream_id: &str) -> bool {
        self.get_bookmark(stream_id).map_or(true, Bookmark::is_empty)
    }

    /// Return a copy with one bookmark field written, creating the bookmark if needed
    #[must_use]
    pub fn write_bookmark(&self, stream_id: &str, update: BookmarkUpdate) -> Self {
        let mut next = self.clone();
        let bookmark = next.bookmarks.entry(stream_id.to_string()).or_default();
        match update {
            BookmarkUpdate::Version(version) => bookmark.version = version,
            BookmarkUpdate::ReplicationKey(key) => bookmark.replication_key = key,
            BookmarkUpdate::ReplicationKeyValue(value) => bookmark.replication_key_value = value,
        }
        next
    }

    /// Return a copy with `currently_syncing` set or cleared
    #[must_use]
    pub fn set_currently_syncing(&self, stream_id: Option<&str>) -> Self {
        let mut next = self.clone();
        next.currently_syncing = stream_id.map(ToString::to_string);
        next
    }
}
