//! Message protocol module
//!
//! Defines the five message kinds exchanged between extraction and delivery,
//! and their newline-delimited JSON encoding.
//!
//! # Overview
//!
//! - `Message` - Tagged union of RECORD, SCHEMA, STATE, ACTIVATE_VERSION, VOLUME
//! - `parse_message` / `format_message` - One message per line of UTF-8 JSON
//! - `MessageSink` - Where producers emit messages (stdout writer, in-memory buffer)

mod codec;
mod types;

pub use codec::{format_message, parse_message, MessageSink, MessageWriter};
pub use types::{
    ActivateVersionMessage, Message, RecordMessage, SchemaMessage, StateMessage, VolumeMessage,
};
