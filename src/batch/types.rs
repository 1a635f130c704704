//! Batch types

use crate::types::{JsonObject, JsonValue};

/// Why a batch was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The stream's declared record count was reached
    LastRecord,
    /// The next record would push the batch past the byte limit, or one record alone reached it
    ByteLimit,
    /// The batch reached the record limit
    RecordLimit,
    /// Input ended before the stream's declared count was reached
    EndOfInput,
}

/// Destination-shaped records for one request
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Stream the records belong to
    pub stream: String,
    /// 1-based position among the stream's batches
    pub index: usize,
    /// Records as `{primary_key, values: {..}}`
    pub records: Vec<JsonObject>,
    /// Serialized size of all records
    pub bytes: usize,
    /// Why the batch was closed
    pub reason: FlushReason,
}

impl Batch {
    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Request body
    pub fn to_body(&self) -> JsonValue {
        JsonValue::Array(self.records.iter().cloned().map(JsonValue::Object).collect())
    }
}

/// Output of the batch builder, in input order
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// A batch is ready to deliver
    Flush(Batch),
    /// A STATE value arrived
    State(JsonValue),
    /// The stream has produced its last batch
    StreamClosed {
        stream: String,
        /// Records accepted for the stream
        records: u64,
        /// Batches built for the stream
        batches: usize,
    },
}

/// Where the builder is in the message stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderPhase {
    /// No SCHEMA seen yet
    #[default]
    AwaitingSchema,
    /// A stream is active
    Syncing,
    /// The last active stream has closed
    BetweenStreams,
}
