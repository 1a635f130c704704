//! Structural record validation against a declared schema
//!
//! Covers the draft-4 keywords the pipeline emits and relies on:
//! `type`, `properties`, `required`, `additionalProperties`, `items`,
//! `enum`, `minimum` and `maximum`. Formats are annotations only.

use super::types::SchemaProperty;
use crate::error::{Error, Result};
use crate::types::JsonValue;

/// Compiled validator for one stream's schema
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    root: SchemaProperty,
}

impl SchemaValidator {
    /// Compile a validator from a raw schema document
    pub fn new(stream: &str, schema: &JsonValue) -> Result<Self> {
        let root: SchemaProperty = serde_json::from_value(schema.clone()).map_err(|e| {
            Error::protocol(format!("Invalid schema for stream '{stream}': {e}"))
        })?;
        Ok(Self { root })
    }

    /// Validate a value, returning the first violation found
    pub fn validate(&self, value: &JsonValue) -> std::result::Result<(), String> {
        check(&self.root, value, "$")
    }

    /// Check whether a value is valid
    pub fn is_valid(&self, value: &JsonValue) -> bool {
        self.validate(value).is_ok()
    }
}

fn check(schema: &SchemaProperty, value: &JsonValue, path: &str) -> std::result::Result<(), String> {
    if let Some(json_type) = &schema.json_type {
        let types = json_type.types();
        if !types.iter().any(|t| t.matches(value)) {
            let expected: Vec<String> = types.iter().map(ToString::to_string).collect();
            return Err(format!(
                "{path}: {value} is not of type {}",
                expected.join(" or ")
            ));
        }
    }

    if let Some(allowed) = &schema.enum_values {
        if !allowed.contains(value) {
            return Err(format!("{path}: {value} is not one of the allowed values"));
        }
    }

    match value {
        JsonValue::Number(n) => {
            let Some(actual) = n.as_f64() else {
                return Ok(());
            };
            if let Some(min) = schema.minimum.as_ref().and_then(serde_json::Number::as_f64) {
                if actual < min {
                    return Err(format!("{path}: {n} is less than the minimum of {min}"));
                }
            }
            if let Some(max) = schema.maximum.as_ref().and_then(serde_json::Number::as_f64) {
                if actual > max {
                    return Err(format!("{path}: {n} is greater than the maximum of {max}"));
                }
            }
        }
        JsonValue::Object(obj) => {
            for name in &schema.required {
                if !obj.contains_key(name) {
                    return Err(format!("{path}: '{name}' is a required property"));
                }
            }
            for (key, child) in obj {
                let child_path = format!("{path}.{key}");
                match schema.properties.as_ref().and_then(|props| props.get(key)) {
                    Some(child_schema) => check(child_schema, child, &child_path)?,
                    None if schema.additional_properties == Some(false) => {
                        return Err(format!(
                            "{path}: additional property '{key}' is not allowed"
                        ));
                    }
                    None => {}
                }
            }
        }
        JsonValue::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (idx, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{path}[{idx}]"))?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}
