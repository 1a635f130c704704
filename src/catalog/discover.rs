//! Catalog discovery from the warehouse's information schema

use super::types::{Catalog, CatalogEntry};
use crate::database::{QueryParam, SourceDatabase};
use crate::error::Result;
use crate::schema::{Inclusion, JsonSchema, JsonType, SchemaProperty};
use crate::types::JsonValue;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

const FLOAT_TYPES: &[&str] = &["float", "float4", "float8", "real", "double", "double precision"];

const STRING_TYPES: &[&str] = &[
    "char",
    "character",
    "nchar",
    "bpchar",
    "text",
    "varchar",
    "character varying",
    "nvarchar",
    "uuid",
];

const DATETIME_TYPES: &[&str] = &[
    "timestamp",
    "timestamptz",
    "timestamp without time zone",
    "timestamp with time zone",
];

/// Byte width of integer column types
fn integer_width(column_type: &str) -> Option<u32> {
    match column_type {
        "tinyint" | "int1" => Some(1),
        "int2" | "smallint" => Some(2),
        "int" | "int4" | "integer" => Some(4),
        "int8" | "bigint" => Some(8),
        _ => None,
    }
}

/// One column as reported by the information schema
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Map a column to its schema property
pub fn schema_for_column(column: &ColumnSpec, is_key: bool) -> SchemaProperty {
    let column_type = column.data_type.to_lowercase();
    let base = column_type
        .split_once('(')
        .map_or(column_type.as_str(), |(name, _)| name)
        .trim();

    let mut property = if base == "bool" || base == "boolean" {
        SchemaProperty::new(JsonType::Boolean)
    } else if let Some(bytes) = integer_width(base) {
        let bits = bytes * 8;
        let max = if bits >= 64 { i64::MAX } else { (1i64 << (bits - 1)) - 1 };
        SchemaProperty::new(JsonType::Integer).with_range(-max - 1, max)
    } else if FLOAT_TYPES.contains(&base) || base == "numeric" || base == "decimal" {
        SchemaProperty::new(JsonType::Number)
    } else if STRING_TYPES.contains(&base) {
        SchemaProperty::new(JsonType::String)
    } else if DATETIME_TYPES.contains(&base) {
        SchemaProperty::new(JsonType::String).with_format("date-time")
    } else if base == "date" {
        SchemaProperty::new(JsonType::String).with_format("date")
    } else {
        return SchemaProperty::unsupported(format!("Unsupported column type {column_type}"));
    };

    property.inclusion = Some(if is_key {
        Inclusion::Automatic
    } else {
        Inclusion::Available
    });
    if column.nullable {
        property.make_nullable();
    }
    property
}

/// Describe every table in `db_schema` as a catalog entry.
///
/// Streams named in `selected` are marked selected; all others must be
/// selected by the user before they sync.
pub fn discover_catalog(
    db: &dyn SourceDatabase,
    db_name: &str,
    db_schema: &str,
    selected: &BTreeSet<String>,
) -> Result<Catalog> {
    info!(schema = %db_schema, "Running discovery");
    let scope = [
        QueryParam::from(db.name()),
        QueryParam::from(db_schema),
    ];

    let mut table_types: BTreeMap<String, String> = BTreeMap::new();
    db.execute_query(
        "SELECT table_name, table_type FROM information_schema.tables \
         WHERE table_catalog = ? AND table_schema = ? ORDER BY table_name",
        &scope,
        &["table_name".to_string(), "table_type".to_string()],
        &mut |row| {
            table_types.insert(text(&row["table_name"]), text(&row["table_type"]));
            Ok(())
        },
    )?;

    let mut columns: BTreeMap<String, Vec<ColumnSpec>> = BTreeMap::new();
    db.execute_query(
        "SELECT table_name, column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_catalog = ? AND table_schema = ? ORDER BY table_name, ordinal_position",
        &scope,
        &[
            "table_name".to_string(),
            "column_name".to_string(),
            "data_type".to_string(),
            "is_nullable".to_string(),
        ],
        &mut |row| {
            columns
                .entry(text(&row["table_name"]))
                .or_default()
                .push(ColumnSpec {
                    name: text(&row["column_name"]),
                    data_type: text(&row["data_type"]),
                    nullable: text(&row["is_nullable"]).eq_ignore_ascii_case("yes"),
                });
            Ok(())
        },
    )?;

    let mut primary_keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let pk_result = db.execute_query(
        "SELECT kc.table_name, kc.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kc \
           ON kc.table_name = tc.table_name \
          AND kc.table_schema = tc.table_schema \
          AND kc.constraint_name = tc.constraint_name \
         WHERE tc.constraint_type = 'PRIMARY KEY' \
           AND tc.table_catalog = ? AND tc.table_schema = ? \
         ORDER BY kc.table_name, kc.ordinal_position",
        &scope,
        &["table_name".to_string(), "column_name".to_string()],
        &mut |row| {
            primary_keys
                .entry(text(&row["table_name"]))
                .or_default()
                .push(text(&row["column_name"]));
            Ok(())
        },
    );
    if let Err(e) = pk_result {
        warn!(error = %e, "Primary key lookup failed, streams will have no key properties");
        primary_keys.clear();
    }

    let mut entries = Vec::new();
    for (table_name, cols) in &columns {
        let keys = primary_keys.get(table_name).cloned().unwrap_or_default();
        let is_view = table_types
            .get(table_name)
            .is_some_and(|t| t.eq_ignore_ascii_case("view"));

        let mut schema = JsonSchema::new();
        let mut valid_replication_keys = Vec::new();
        for col in cols {
            let property = schema_for_column(col, keys.contains(&col.name));
            if property.is_date_time() {
                valid_replication_keys.push(col.name.clone());
            }
            schema.add_property(&col.name, property);
        }

        let key_properties: Vec<String> = keys
            .into_iter()
            .filter(|k| schema.get_property(k).is_some_and(|p| !p.is_unsupported()))
            .collect();

        let tap_stream_id = format!("{db_name}.{db_schema}.{table_name}");
        let key_field = if is_view {
            "view-key-properties"
        } else {
            "table-key-properties"
        };

        let mut entry = CatalogEntry::new(tap_stream_id, table_name.clone(), schema)
            .with_table(format!("{db_schema}.{table_name}"))
            .with_metadata(&[], "selected-by-default", json!(false))
            .with_metadata(&[], key_field, json!(key_properties))
            .with_metadata(&[], "is-view", json!(is_view))
            .with_metadata(&[], "schema-name", json!(db_schema))
            .with_metadata(&[], "database-name", json!(db_name));
        entry.database_name = Some(db_name.to_string());

        if selected.contains(table_name) {
            entry.write_metadata(&[], "selected", json!(true));
        }

        if valid_replication_keys.is_empty() {
            entry.write_metadata(
                &[],
                "forced-replication-method",
                json!({
                    "replication-method": "FULL_TABLE",
                    "reason": "No replication keys found from table"
                }),
            );
        } else {
            entry.write_metadata(&[], "valid-replication-keys", json!(valid_replication_keys));
        }

        for col in cols {
            let unsupported = entry
                .schema
                .get_property(&col.name)
                .is_some_and(SchemaProperty::is_unsupported);
            let inclusion = entry
                .schema
                .get_property(&col.name)
                .and_then(|p| p.inclusion)
                .map_or(JsonValue::Null, |i| json!(i));
            let crumb = ["properties", col.name.as_str()];
            entry.write_metadata(&crumb, "selected-by-default", json!(!unsupported));
            entry.write_metadata(&crumb, "sql-datatype", json!(col.data_type.to_lowercase()));
            entry.write_metadata(&crumb, "inclusion", inclusion);
        }

        entries.push(entry);
    }

    info!(streams = entries.len(), "Completed discovery");
    Ok(Catalog::new(entries))
}

fn text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}
