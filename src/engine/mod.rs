//! Execution engine module
//!
//! Turns warehouse rows into an ordered message stream with bookmarks and
//! full-table version activation.
//!
//! # Overview
//!
//! The engine module provides:
//! - `SyncEngine` - Per-stream replication state machine
//! - `SyncConfig` - Start date, row cap, checkpoint cadence and key pre-filters
//! - `StreamQuery` - SELECT/COUNT construction for one stream

mod query;
mod types;

pub use query::StreamQuery;
pub use types::{SyncConfig, SyncStats, CHECKPOINT_INTERVAL};

use crate::catalog::{Catalog, CatalogEntry};
use crate::database::{QueryParam, SourceDatabase};
use crate::destination::KeyFilter;
use crate::error::{Error, Result};
use crate::protocol::{Message, MessageSink};
use crate::state::{BookmarkUpdate, State};
use crate::types::{JsonValue, ReplicationMethod};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Sync engine for orchestrating extraction
pub struct SyncEngine<'a> {
    /// Source warehouse
    db: &'a dyn SourceDatabase,
    /// Destination key lookups for filtered streams
    key_filter: Option<&'a dyn KeyFilter>,
    /// Sync configuration
    config: SyncConfig,
    /// Statistics
    stats: SyncStats,
}

impl<'a> SyncEngine<'a> {
    /// Create a new sync engine
    pub fn new(db: &'a dyn SourceDatabase) -> Self {
        Self {
            db,
            key_filter: None,
            config: SyncConfig::default(),
            stats: SyncStats::default(),
        }
    }

    /// Set sync configuration
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the key filter used by streams with a configured pre-filter
    #[must_use]
    pub fn with_key_filter(mut self, key_filter: &'a dyn KeyFilter) -> Self {
        self.key_filter = Some(key_filter);
        self
    }

    /// Get statistics
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Sync every stream in `catalog`, in order, and return the final state.
    ///
    /// On a fatal error the latest state is emitted before the error is
    /// returned so a later run can resume from it.
    pub async fn sync(
        &mut self,
        catalog: &Catalog,
        state: State,
        sink: &mut dyn MessageSink,
    ) -> Result<State> {
        let start = Instant::now();
        let mut state = state;
        info!(streams = catalog.streams.len(), "Starting sync");

        for entry in &catalog.streams {
            let columns = entry.selected_columns();
            if columns.is_empty() {
                warn!(stream = %entry.stream, "No columns selected, skipping stream");
                self.stats.streams_skipped += 1;
                continue;
            }

            state = state.set_currently_syncing(Some(&entry.tap_stream_id));
            self.emit_state(&state, sink)?;

            if let Err(e) = self.sync_stream(entry, &columns, &mut state, sink).await {
                error!(stream = %entry.stream, error = %e, "Stream sync failed");
                // the stream error takes precedence over a failed flush
                let _ = self.emit_state(&state, sink);
                return Err(e);
            }
            self.stats.streams_synced += 1;
        }

        state = state.set_currently_syncing(None);
        self.emit_state(&state, sink)?;

        self.stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            streams = self.stats.streams_synced,
            records = self.stats.records_synced,
            duration_ms = self.stats.duration_ms,
            "Completed sync"
        );
        Ok(state)
    }

    async fn sync_stream(
        &mut self,
        entry: &CatalogEntry,
        columns: &[String],
        state: &mut State,
        sink: &mut dyn MessageSink,
    ) -> Result<()> {
        let stream_id = entry.tap_stream_id.as_str();
        let method = entry.replication_method();
        let replication_key = match method {
            ReplicationMethod::Incremental => Some(entry.replication_key().ok_or_else(|| {
                Error::config(format!(
                    "Stream '{}' is INCREMENTAL but has no replication-key",
                    entry.stream
                ))
            })?),
            ReplicationMethod::FullTable => None,
        };

        let bookmark_was_empty = state.bookmark_is_empty(stream_id);
        let version = state
            .version(stream_id)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        *state = state.write_bookmark(stream_id, BookmarkUpdate::Version(Some(version)));

        info!(
            stream = %entry.stream,
            method = %method,
            version,
            replication_key = ?replication_key,
            "Beginning stream sync"
        );

        if method == ReplicationMethod::FullTable || bookmark_was_empty {
            sink.emit(Message::activate_version(&entry.stream, version))?;
        }

        let schema = entry.schema.restricted_to(columns);
        sink.emit(Message::schema(
            &entry.stream,
            schema.to_json(),
            entry.key_properties(),
            replication_key.map(|k| vec![k.to_string()]),
        ))?;

        let mut query = StreamQuery {
            table: {
                let (db_schema, table) = entry.table_parts();
                self.db.qualify_table(db_schema, table)
            },
            columns: columns.to_vec(),
            limit: self.config.limit,
            ..StreamQuery::default()
        };

        if let Some(key) = replication_key {
            let cursor = match state.replication_key_value(stream_id) {
                Some(value) => value.clone(),
                None => JsonValue::String(
                    self.config
                        .start_date
                        .format(crate::config::START_DATE_FORMAT)
                        .to_string(),
                ),
            };
            let is_date_time = schema.get_property(key).is_some_and(|p| p.is_date_time());
            let param = cursor_param(&entry.stream, &cursor, is_date_time)?;
            debug!(stream = %entry.stream, cursor = %cursor, "Resolved cursor");
            query.cursor = Some((key.to_string(), param));
            query.order_by = vec![key.to_string()];
        } else {
            query.order_by = entry
                .key_properties()
                .into_iter()
                .filter(|k| columns.contains(k))
                .collect();
        }

        query.key_filter = self.resolve_key_filter(entry).await?;

        let (count_sql, count_params) = query.count_sql(self.db);
        let total = self
            .db
            .query_count(&count_sql, &count_params)
            .map_err(|e| Error::query(&entry.stream, e.to_string()))?;
        sink.emit(Message::volume(&entry.stream, total))?;

        let (sql, params) = query.select_sql(self.db);
        debug!(stream = %entry.stream, sql = %sql, "Executing query");

        let time_extracted = Utc::now();
        let checkpoint_interval = self.config.checkpoint_interval.max(1);
        let mut rows_saved: u64 = 0;
        let mut states_emitted = 0;
        self.db
            .execute_query(&sql, &params, columns, &mut |row| {
                let cursor_value = replication_key
                    .and_then(|key| row.get(key))
                    .filter(|v| !v.is_null())
                    .cloned();
                sink.emit(Message::record(
                    &entry.stream,
                    row,
                    Some(version),
                    Some(time_extracted),
                ))?;
                rows_saved += 1;

                if let Some(value) = cursor_value {
                    *state = state.write_bookmark(
                        stream_id,
                        BookmarkUpdate::ReplicationKeyValue(Some(value)),
                    );
                }
                if rows_saved % checkpoint_interval == 0 {
                    sink.emit(Message::state(state.to_value()))?;
                    states_emitted += 1;
                }
                Ok(())
            })
            .map_err(|e| match e {
                Error::Database(inner) => Error::query(&entry.stream, inner.to_string()),
                other => other,
            })?;
        self.stats.records_synced += rows_saved;
        self.stats.states_emitted += states_emitted;

        if method == ReplicationMethod::FullTable {
            sink.emit(Message::activate_version(&entry.stream, version))?;
            *state = state.write_bookmark(stream_id, BookmarkUpdate::Version(None));
        }
        self.emit_state(state, sink)?;

        info!(stream = %entry.stream, rows = rows_saved, "Finished stream sync");
        Ok(())
    }

    /// Key column and valid keys for a filtered stream
    async fn resolve_key_filter(&self, entry: &CatalogEntry) -> Result<Option<(String, Vec<String>)>> {
        let Some(filter) = self.config.filters.get(&entry.stream) else {
            return Ok(None);
        };
        let key_filter = self.key_filter.ok_or_else(|| {
            Error::key_filter(&entry.stream, "stream is filtered but no key filter is configured")
        })?;
        let column = match &filter.source_key {
            Some(column) => column.clone(),
            None => entry.key_properties().into_iter().next().ok_or_else(|| {
                Error::key_filter(&entry.stream, "stream has no key column to filter on")
            })?,
        };

        let keys = key_filter
            .fetch_valid_keys(&filter.target_entity, &filter.target_primary_key)
            .await
            .map_err(|e| match e {
                Error::KeyFilter { .. } => e,
                other => Error::key_filter(&entry.stream, other.to_string()),
            })?;
        info!(stream = %entry.stream, keys = keys.len(), column = %column, "Resolved key filter");
        Ok(Some((column, keys.into_iter().collect())))
    }

    fn emit_state(&mut self, state: &State, sink: &mut dyn MessageSink) -> Result<()> {
        self.stats.states_emitted += 1;
        sink.emit(Message::state(state.to_value()))
    }
}

impl std::fmt::Debug for SyncEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("db", &self.db.name())
            .field("has_key_filter", &self.key_filter.is_some())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Bind a cursor value, as a timestamp when the replication key is a date-time
fn cursor_param(stream: &str, value: &JsonValue, is_date_time: bool) -> Result<QueryParam> {
    match value {
        JsonValue::String(s) if is_date_time => parse_timestamp(s)
            .map(QueryParam::Timestamp)
            .ok_or_else(|| Error::state(format!("Bookmark for '{stream}' is not a timestamp: {s}"))),
        JsonValue::String(s) => Ok(QueryParam::Text(s.clone())),
        JsonValue::Number(n) => Ok(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => QueryParam::Integer(i),
            (None, Some(f)) => QueryParam::Float(f),
            _ => QueryParam::Text(n.to_string()),
        }),
        other => Err(Error::state(format!(
            "Bookmark for '{stream}' has an unusable cursor value: {other}"
        ))),
    }
}

/// Parse a bookmark timestamp; zone-less values are taken as UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests;
