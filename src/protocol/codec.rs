//! Line codec for protocol messages

use super::types::{
    ActivateVersionMessage, Message, RecordMessage, SchemaMessage, StateMessage, VolumeMessage,
};
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use chrono::{DateTime, Utc};
use std::io::Write;

/// Parse one line of input into a message
pub fn parse_message(line: &str) -> Result<Message> {
    let value: JsonValue = serde_json::from_str(line)
        .map_err(|e| Error::protocol(format!("Unable to parse line as JSON ({e}): {line}")))?;

    let JsonValue::Object(obj) = value else {
        return Err(Error::protocol(format!("Message is not a JSON object: {line}")));
    };

    let msg_type = required_key(&obj, "type", line)?;
    let msg_type = msg_type
        .as_str()
        .ok_or_else(|| Error::protocol(format!("Message 'type' must be a string: {line}")))?;

    match msg_type {
        "RECORD" => {
            let record = match required_key(&obj, "record", line)? {
                JsonValue::Object(record) => record.clone(),
                _ => return Err(Error::protocol(format!("'record' must be an object: {line}"))),
            };
            Ok(Message::Record(RecordMessage {
                stream: required_str(&obj, "stream", line)?,
                record,
                version: optional_i64(&obj, "version", line)?,
                time_extracted: optional_time(&obj, line)?,
            }))
        }
        "SCHEMA" => Ok(Message::Schema(SchemaMessage {
            stream: required_str(&obj, "stream", line)?,
            schema: required_key(&obj, "schema", line)?.clone(),
            key_properties: string_list(required_key(&obj, "key_properties", line)?, line)?,
            bookmark_properties: match obj.get("bookmark_properties") {
                None | Some(JsonValue::Null) => None,
                Some(value) => Some(string_list(value, line)?),
            },
        })),
        "STATE" => Ok(Message::State(StateMessage {
            value: required_key(&obj, "value", line)?.clone(),
        })),
        "ACTIVATE_VERSION" => Ok(Message::ActivateVersion(ActivateVersionMessage {
            stream: required_str(&obj, "stream", line)?,
            version: required_key(&obj, "version", line)?
                .as_i64()
                .ok_or_else(|| Error::protocol(format!("'version' must be an integer: {line}")))?,
        })),
        "VOLUME" => Ok(Message::Volume(VolumeMessage {
            stream: required_str(&obj, "stream", line)?,
            count: required_key(&obj, "count", line)?
                .as_u64()
                .ok_or_else(|| Error::protocol(format!("'count' must be a count: {line}")))?,
        })),
        other => Err(Error::UnknownMessageType {
            message_type: other.to_string(),
        }),
    }
}

/// Format a message as a single line of JSON (no trailing newline)
pub fn format_message(message: &Message) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

fn required_key<'a>(obj: &'a JsonObject, key: &str, line: &str) -> Result<&'a JsonValue> {
    obj.get(key).ok_or_else(|| Error::missing_key(key, line))
}

fn required_str(obj: &JsonObject, key: &str, line: &str) -> Result<String> {
    required_key(obj, key, line)?
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| Error::protocol(format!("'{key}' must be a string: {line}")))
}

fn optional_i64(obj: &JsonObject, key: &str, line: &str) -> Result<Option<i64>> {
    match obj.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::protocol(format!("'{key}' must be an integer: {line}"))),
    }
}

fn optional_time(obj: &JsonObject, line: &str) -> Result<Option<DateTime<Utc>>> {
    match obj.get("time_extracted") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| {
                Error::protocol(format!(
                    "'time_extracted' must be ISO-8601 with a zone ({e}): {line}"
                ))
            }),
        Some(_) => Err(Error::protocol(format!(
            "'time_extracted' must be a string: {line}"
        ))),
    }
}

/// Accepts a single string or a list of strings
fn string_list(value: &JsonValue, line: &str) -> Result<Vec<String>> {
    match value {
        JsonValue::String(s) => Ok(vec![s.clone()]),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(ToString::to_string).ok_or_else(|| {
                    Error::protocol(format!("expected a list of strings: {line}"))
                })
            })
            .collect(),
        _ => Err(Error::protocol(format!(
            "expected a string or list of strings: {line}"
        ))),
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Destination for emitted messages
pub trait MessageSink {
    /// Emit one message
    fn emit(&mut self, message: Message) -> Result<()>;
}

impl MessageSink for Vec<Message> {
    fn emit(&mut self, message: Message) -> Result<()> {
        self.push(message);
        Ok(())
    }
}

/// Writes messages as newline-delimited JSON, flushing after every line
#[derive(Debug)]
pub struct MessageWriter<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> MessageWriter<W> {
    /// Wrap a writer
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Number of messages written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl MessageWriter<std::io::Stdout> {
    /// Writer on process stdout
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> MessageSink for MessageWriter<W> {
    fn emit(&mut self, message: Message) -> Result<()> {
        let line = format_message(&message)?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }
}
