//! DuckDB-backed source database
//!
//! The warehouse is attached read-only through DuckDB's `postgres` extension,
//! which speaks the wire protocol Redshift shares with PostgreSQL.

use super::source::{QueryParam, SourceDatabase};
use crate::config::ExtractConfig;
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use duckdb::types::{TimeUnit, Value};
use duckdb::Connection;

/// Catalog name the warehouse is attached as
const ATTACHED_CATALOG: &str = "source_db";

/// Catalog name of a plain in-memory DuckDB database
const MEMORY_CATALOG: &str = "memory";

/// Source database using DuckDB as the query engine
pub struct DuckDbSource {
    /// DuckDB connection
    conn: Connection,
    /// Catalog queries are qualified with
    catalog: String,
    /// Connection description (for logging, password masked)
    connection_info: String,
}

impl std::fmt::Debug for DuckDbSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbSource")
            .field("catalog", &self.catalog)
            .field("connection_info", &self.connection_info)
            .finish_non_exhaustive()
    }
}

impl DuckDbSource {
    /// Attach the configured warehouse
    pub fn connect(config: &ExtractConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::config(format!("Failed to create DuckDB connection: {e}")))?;

        conn.execute_batch("INSTALL postgres; LOAD postgres;")
            .map_err(|e| Error::config(format!("Failed to load postgres extension: {e}")))?;

        let connection_string = build_connection_string(config);
        let attach_sql = format!(
            "ATTACH '{}' AS {ATTACHED_CATALOG} (TYPE POSTGRES, READ_ONLY);",
            connection_string.replace('\'', "''")
        );
        conn.execute_batch(&attach_sql)
            .map_err(|e| Error::config(format!("Failed to attach warehouse: {e}")))?;

        let connection_info = format!(
            "host={} port={} dbname={} user={} password=****",
            config.host, config.port, config.dbname, config.user
        );
        tracing::info!(connection = %connection_info, "Connected to warehouse");

        Ok(Self {
            conn,
            catalog: ATTACHED_CATALOG.to_string(),
            connection_info,
        })
    }

    /// Plain in-memory database, populated with `execute_batch`
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::config(format!("Failed to create DuckDB connection: {e}")))?;
        Ok(Self {
            conn,
            catalog: MEMORY_CATALOG.to_string(),
            connection_info: ":memory:".to_string(),
        })
    }

    /// Run statements directly (DDL and fixtures)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Connection description with the password masked
    pub fn connection_info(&self) -> &str {
        &self.connection_info
    }
}

impl SourceDatabase for DuckDbSource {
    fn name(&self) -> &str {
        &self.catalog
    }

    fn qualify_table(&self, schema: Option<&str>, table: &str) -> String {
        let schema = schema.unwrap_or(if self.catalog == ATTACHED_CATALOG {
            "public"
        } else {
            "main"
        });
        format!(
            "{}.{}.{}",
            self.quote_identifier(&self.catalog),
            self.quote_identifier(schema),
            self.quote_identifier(table)
        )
    }

    fn execute_query(
        &self,
        sql: &str,
        params: &[QueryParam],
        columns: &[String],
        on_row: &mut dyn FnMut(JsonObject) -> Result<()>,
    ) -> Result<u64> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing query");

        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(duckdb::params_from_iter(params.iter().map(to_duckdb_value)))?;

        let mut delivered = 0u64;
        while let Some(row) = rows.next()? {
            let mut record = JsonObject::new();
            for (idx, column) in columns.iter().enumerate() {
                let value: Value = row.get(idx)?;
                record.insert(column.clone(), duckdb_value_to_json(value));
            }
            on_row(record)?;
            delivered += 1;
        }

        Ok(delivered)
    }

    fn query_count(&self, sql: &str, params: &[QueryParam]) -> Result<u64> {
        tracing::debug!(sql = %sql, "Executing count");

        let mut stmt = self.conn.prepare(sql)?;
        let count: i64 = stmt.query_row(
            duckdb::params_from_iter(params.iter().map(to_duckdb_value)),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

/// libpq key/value connection string
fn build_connection_string(config: &ExtractConfig) -> String {
    fn quote(value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    }

    format!(
        "host={} port={} dbname={} user={} password={}",
        quote(&config.host),
        config.port,
        quote(&config.dbname),
        quote(&config.user),
        quote(&config.password)
    )
}

fn to_duckdb_value(param: &QueryParam) -> Value {
    match param {
        QueryParam::Text(s) => Value::Text(s.clone()),
        QueryParam::Integer(i) => Value::BigInt(*i),
        QueryParam::Float(f) => Value::Double(*f),
        QueryParam::Timestamp(ts) => Value::Timestamp(TimeUnit::Microsecond, ts.timestamp_micros()),
    }
}

fn timestamp_to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert DuckDB Value to JSON Value
pub(crate) fn duckdb_value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(i) => JsonValue::Number(i.into()),
        Value::SmallInt(i) => JsonValue::Number(i.into()),
        Value::Int(i) => JsonValue::Number(i.into()),
        Value::BigInt(i) => JsonValue::Number(i.into()),
        Value::HugeInt(i) => i64::try_from(i)
            .map_or_else(|_| JsonValue::String(i.to_string()), |v| JsonValue::Number(v.into())),
        Value::UTinyInt(i) => JsonValue::Number(i.into()),
        Value::USmallInt(i) => JsonValue::Number(i.into()),
        Value::UInt(i) => JsonValue::Number(i.into()),
        Value::UBigInt(i) => JsonValue::Number(i.into()),
        Value::Float(f) => {
            serde_json::Number::from_f64(f64::from(f)).map_or(JsonValue::Null, JsonValue::Number)
        }
        Value::Double(f) => serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        Value::Decimal(d) => {
            let text = d.to_string();
            serde_json::from_str::<serde_json::Number>(&text)
                .map_or(JsonValue::String(text), JsonValue::Number)
        }
        Value::Text(s) => JsonValue::String(s),
        Value::Enum(s) => JsonValue::String(s),
        Value::Blob(b) => JsonValue::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b,
        )),
        Value::Timestamp(unit, i) => {
            let micros = timestamp_to_micros(unit, i);
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|dt| JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()))
                .unwrap_or(JsonValue::Number(i.into()))
        }
        Value::Date32(d) => {
            // Days since epoch (719163 is the number of days from 1 CE to 1970-01-01)
            chrono::NaiveDate::from_num_days_from_ce_opt(d + 719_163)
                .map(|date| JsonValue::String(date.format("%Y-%m-%d").to_string()))
                .unwrap_or(JsonValue::Number(d.into()))
        }
        Value::Time64(unit, t) => {
            let micros = timestamp_to_micros(unit, t);
            let secs = micros / 1_000_000;
            let frac = micros % 1_000_000;
            JsonValue::String(format!(
                "{:02}:{:02}:{:02}.{:06}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                frac
            ))
        }
        other => JsonValue::String(format!("{other:?}")),
    }
}
