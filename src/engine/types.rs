//! Engine types
//!
//! Configuration and statistics for the sync engine.

use crate::config::{ExtractConfig, StreamFilterConfig};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Records between periodic STATE checkpoints
pub const CHECKPOINT_INTERVAL: u64 = 1000;

/// Configuration for a sync run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cursor used by incremental streams with no bookmark
    pub start_date: DateTime<Utc>,
    /// Row cap per stream for one invocation
    pub limit: Option<u64>,
    /// Emit a STATE every this many records
    pub checkpoint_interval: u64,
    /// Key pre-filters by stream name
    pub filters: BTreeMap<String, StreamFilterConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_date: DateTime::<Utc>::default(),
            limit: None,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            filters: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Create a new sync config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the extract config
    pub fn from_extract(config: &ExtractConfig) -> Result<Self> {
        Ok(Self {
            start_date: config.start_date()?,
            limit: config.limit,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            filters: config.streams.clone(),
        })
    }

    /// Set the start date
    #[must_use]
    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = start_date;
        self
    }

    /// Set the row cap
    #[must_use]
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Set the checkpoint interval
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Narrow a stream to keys of a destination entity
    #[must_use]
    pub fn with_filter(mut self, stream: impl Into<String>, filter: StreamFilterConfig) -> Self {
        self.filters.insert(stream.into(), filter);
        self
    }
}

/// Statistics from a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Records emitted
    pub records_synced: u64,
    /// Streams fully synced
    pub streams_synced: usize,
    /// Streams skipped for having no selected columns
    pub streams_skipped: usize,
    /// STATE messages emitted
    pub states_emitted: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }
}
