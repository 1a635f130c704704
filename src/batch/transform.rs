//! Record transforms applied before batching
//!
//! `flatten` -> `remap` -> `shape_record`, in that order.

use crate::config::FieldMappings;
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};

/// Separator joining nested keys
pub const FLATTEN_SEPARATOR: &str = "__";

/// Suffix a source value is staged under when it maps onto its own name
const STAGING_SUFFIX: &str = "_tmp";

/// Flatten nested objects into `parent__child` keys.
///
/// Lists are stringified, not recursed into.
pub fn flatten(record: &JsonObject) -> JsonObject {
    let mut flat = JsonObject::new();
    flatten_into(&mut flat, record, None);
    flat
}

fn flatten_into(flat: &mut JsonObject, nested: &JsonObject, parent: Option<&str>) {
    for (key, value) in nested {
        let name = match parent {
            Some(parent) => format!("{parent}{FLATTEN_SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            JsonValue::Object(child) => flatten_into(flat, child, Some(&name)),
            JsonValue::Array(_) => {
                flat.insert(name, JsonValue::String(value.to_string()));
            }
            other => {
                flat.insert(name, other.clone());
            }
        }
    }
}

/// Rename source attributes to destination attributes, in mapping order.
///
/// A mapping whose source and target names are equal stages the value under
/// a suffixed key first, so removing the source does not drop the target.
pub fn remap(stream: &str, mut record: JsonObject, mappings: &FieldMappings) -> Result<JsonObject> {
    for (target, source) in mappings.iter() {
        let mut source = source.to_string();
        if target == source {
            let staged = format!("{source}{STAGING_SUFFIX}");
            let value = record
                .get(&source)
                .cloned()
                .ok_or_else(|| missing_source(stream, target, &source))?;
            record.insert(staged.clone(), value);
            source = staged;
        }
        let value = record
            .get(&source)
            .cloned()
            .ok_or_else(|| missing_source(stream, target, &source))?;
        record.insert(target.to_string(), value);
        record.remove(&source);
    }
    Ok(record)
}

fn missing_source(stream: &str, target: &str, source: &str) -> Error {
    Error::mapping(
        stream,
        format!("source attribute '{source}' for '{target}' is not in the record"),
    )
}

/// Split a record into `{primary_key: .., values: {rest}}`
pub fn shape_record(stream: &str, mut record: JsonObject, primary_key: &str) -> Result<JsonObject> {
    let key = record.remove(primary_key).ok_or_else(|| {
        Error::mapping(
            stream,
            format!("primary key '{primary_key}' is not in the record"),
        )
    })?;

    let mut shaped = JsonObject::new();
    shaped.insert(primary_key.to_string(), key);
    shaped.insert("values".to_string(), JsonValue::Object(record));
    Ok(shaped)
}

/// Serialized size used for the byte limit
pub fn record_size(record: &JsonObject) -> usize {
    serde_json::to_vec(record).map_or(0, |bytes| bytes.len())
}
