//! Batch builder state machine

use super::transform::{flatten, record_size, remap, shape_record};
use super::types::{Batch, BatchEvent, BuilderPhase, FlushReason};
use crate::config::{DeliveryLimits, LoadConfig, StreamTargetConfig};
use crate::error::{Error, Result};
use crate::protocol::{Message, RecordMessage, SchemaMessage};
use crate::schema::SchemaValidator;
use crate::types::JsonObject;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Per-stream batching context, created on SCHEMA and retired on close
#[derive(Debug)]
struct StreamContext {
    validator: SchemaValidator,
    target: StreamTargetConfig,
    total_records: Option<u64>,
    record_count: u64,
    batches_built: usize,
    pending: Vec<JsonObject>,
    pending_bytes: usize,
    closed: bool,
}

impl StreamContext {
    fn take_batch(&mut self, stream: &str, reason: FlushReason) -> Batch {
        self.batches_built += 1;
        let batch = Batch {
            stream: stream.to_string(),
            index: self.batches_built,
            records: std::mem::take(&mut self.pending),
            bytes: std::mem::take(&mut self.pending_bytes),
            reason,
        };
        info!(
            stream = %stream,
            batch = batch.index,
            records = batch.len(),
            bytes = batch.bytes,
            reason = ?reason,
            "Batch built"
        );
        batch
    }

    fn close(&mut self, stream: &str) -> BatchEvent {
        self.closed = true;
        BatchEvent::StreamClosed {
            stream: stream.to_string(),
            records: self.record_count,
            batches: self.batches_built,
        }
    }
}

/// Active stream and version
#[derive(Debug, Clone, PartialEq)]
struct Active {
    stream: String,
    version: Option<i64>,
}

/// Accumulates RECORD messages into size- and count-bounded batches.
///
/// Messages must be fed in input order. Each call returns the events the
/// message produced, in the order they must be acted on.
#[derive(Debug)]
pub struct BatchBuilder {
    config: LoadConfig,
    limits: DeliveryLimits,
    streams: HashMap<String, StreamContext>,
    active: Option<Active>,
    phase: BuilderPhase,
}

impl BatchBuilder {
    /// Create a builder for the streams in `config`
    pub fn new(config: LoadConfig, limits: DeliveryLimits) -> Self {
        Self {
            config,
            limits,
            streams: HashMap::new(),
            active: None,
            phase: BuilderPhase::AwaitingSchema,
        }
    }

    /// Current phase
    pub fn phase(&self) -> BuilderPhase {
        self.phase
    }

    /// Records accepted so far for `stream`
    pub fn record_count(&self, stream: &str) -> u64 {
        self.streams.get(stream).map_or(0, |ctx| ctx.record_count)
    }

    /// Handle one message
    pub fn handle(&mut self, message: Message) -> Result<Vec<BatchEvent>> {
        match message {
            Message::Schema(schema) => self.on_schema(schema),
            Message::ActivateVersion(activate) => {
                debug!(stream = %activate.stream, version = activate.version, "Activating version");
                self.active = Some(Active {
                    stream: activate.stream,
                    version: Some(activate.version),
                });
                Ok(Vec::new())
            }
            Message::Volume(volume) => self.on_volume(&volume.stream, volume.count),
            Message::Record(record) => self.on_record(record),
            Message::State(state) => Ok(vec![BatchEvent::State(state.value)]),
        }
    }

    /// Flush every stream still open at end of input
    pub fn finish(&mut self) -> Vec<BatchEvent> {
        let mut events = Vec::new();
        let mut names: Vec<String> = self
            .streams
            .iter()
            .filter(|(_, ctx)| !ctx.closed)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();

        for name in names {
            let Some(ctx) = self.streams.get_mut(&name) else {
                continue;
            };
            if let Some(total) = ctx.total_records {
                if ctx.record_count < total {
                    warn!(
                        stream = %name,
                        received = ctx.record_count,
                        declared = total,
                        "Input ended before the declared record count"
                    );
                }
            }
            if !ctx.pending.is_empty() {
                events.push(BatchEvent::Flush(ctx.take_batch(&name, FlushReason::EndOfInput)));
            }
            events.push(ctx.close(&name));
        }
        self.phase = BuilderPhase::BetweenStreams;
        events
    }

    fn on_schema(&mut self, schema: SchemaMessage) -> Result<Vec<BatchEvent>> {
        let target = self.config.stream(&schema.stream)?.clone();
        let validator = SchemaValidator::new(&schema.stream, &schema.schema)?;
        info!(stream = %schema.stream, keys = ?schema.key_properties, "Registered schema");

        match self.streams.get_mut(&schema.stream) {
            Some(ctx) if !ctx.closed => {
                ctx.validator = validator;
                ctx.target = target;
            }
            // a closed stream starts over with a fresh context
            _ => {
                self.streams.insert(
                    schema.stream.clone(),
                    StreamContext {
                        validator,
                        target,
                        total_records: None,
                        record_count: 0,
                        batches_built: 0,
                        pending: Vec::new(),
                        pending_bytes: 0,
                        closed: false,
                    },
                );
            }
        }

        let version = match &self.active {
            Some(active) if active.stream == schema.stream => active.version,
            _ => None,
        };
        self.active = Some(Active {
            stream: schema.stream,
            version,
        });
        self.phase = BuilderPhase::Syncing;
        Ok(Vec::new())
    }

    fn on_volume(&mut self, stream: &str, count: u64) -> Result<Vec<BatchEvent>> {
        self.check_active(stream)?;
        let ctx = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| Error::SchemaNotSeen {
                stream: stream.to_string(),
            })?;
        ctx.total_records = Some(count);
        let batches = count.div_ceil(self.limits.max_records as u64);
        info!(stream = %stream, records = count, batches, "Stream volume declared");

        if count == 0 || ctx.record_count >= count {
            let mut events = Vec::new();
            if !ctx.pending.is_empty() {
                events.push(BatchEvent::Flush(ctx.take_batch(stream, FlushReason::LastRecord)));
            }
            events.push(ctx.close(stream));
            self.phase = BuilderPhase::BetweenStreams;
            return Ok(events);
        }
        Ok(Vec::new())
    }

    fn on_record(&mut self, message: RecordMessage) -> Result<Vec<BatchEvent>> {
        let RecordMessage {
            stream,
            record,
            version,
            ..
        } = message;

        if !self.streams.contains_key(&stream) {
            return Err(Error::SchemaNotSeen { stream });
        }
        self.check_active(&stream)?;
        self.check_version(&stream, version)?;

        let max_bytes = self.limits.max_bytes;
        let max_records = self.limits.max_records;
        let ctx = self
            .streams
            .get_mut(&stream)
            .ok_or_else(|| Error::SchemaNotSeen {
                stream: stream.clone(),
            })?;
        if ctx.closed {
            return Err(Error::protocol(format!(
                "record for '{stream}' after its declared {} records",
                ctx.record_count
            )));
        }

        ctx.validator
            .validate(&serde_json::Value::Object(record.clone()))
            .map_err(|message| Error::validation(&stream, message))?;

        let flat = flatten(&record);
        let mapped = remap(&stream, flat, &ctx.target.field_mappings)?;
        let shaped = shape_record(&stream, mapped, &ctx.target.primary_key)?;
        let size = record_size(&shaped);

        let mut events = Vec::new();
        if !ctx.pending.is_empty() && ctx.pending_bytes + size >= max_bytes {
            events.push(BatchEvent::Flush(ctx.take_batch(&stream, FlushReason::ByteLimit)));
        }

        ctx.pending.push(shaped);
        ctx.pending_bytes += size;
        ctx.record_count += 1;

        let last_record = ctx.total_records == Some(ctx.record_count);
        let reason = if last_record {
            Some(FlushReason::LastRecord)
        } else if ctx.pending_bytes >= max_bytes {
            Some(FlushReason::ByteLimit)
        } else if ctx.pending.len() >= max_records {
            Some(FlushReason::RecordLimit)
        } else {
            None
        };

        if let Some(reason) = reason {
            events.push(BatchEvent::Flush(ctx.take_batch(&stream, reason)));
        }
        if last_record {
            events.push(ctx.close(&stream));
            self.phase = BuilderPhase::BetweenStreams;
        }
        Ok(events)
    }

    fn check_active(&self, stream: &str) -> Result<()> {
        match &self.active {
            Some(active) if active.stream == stream => Ok(()),
            Some(active) => Err(Error::CommingledStreams {
                expected: active.stream.clone(),
                found: stream.to_string(),
            }),
            None => Err(Error::SchemaNotSeen {
                stream: stream.to_string(),
            }),
        }
    }

    fn check_version(&mut self, stream: &str, version: Option<i64>) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        match (active.version, version) {
            (Some(expected), Some(found)) if expected != found => Err(Error::CommingledStreams {
                expected: format!("{stream} version {expected}"),
                found: format!("{stream} version {found}"),
            }),
            (None, Some(found)) => {
                active.version = Some(found);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
