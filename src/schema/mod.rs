//! Stream schema module
//!
//! JSON-schema-shaped column type maps carried by catalog entries and SCHEMA
//! messages, plus the structural validator applied to incoming records.
//!
//! # Features
//!
//! - **Typed schema**: `JsonSchema` / `SchemaProperty` with discovery annotations
//! - **Nullable types**: `["null", t]` unions
//! - **Validation**: `SchemaValidator` over raw JSON records

mod types;
mod validate;

pub use types::{Inclusion, JsonSchema, JsonType, JsonTypeOrArray, SchemaProperty};
pub use validate::SchemaValidator;
