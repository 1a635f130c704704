//! Source database seam

use crate::error::Result;
use crate::types::JsonObject;
use chrono::{DateTime, Utc};

/// Positional query parameter bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<DateTime<Utc>> for QueryParam {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Read-only access to the warehouse being extracted
///
/// Rows are streamed to a callback one at a time so the caller can emit
/// messages while the cursor is still open.
pub trait SourceDatabase {
    /// Catalog name the warehouse is reachable under
    fn name(&self) -> &str;

    /// Quote an identifier for use in SQL
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Fully qualified, quoted table reference
    fn qualify_table(&self, schema: Option<&str>, table: &str) -> String;

    /// Run a parameterized SELECT, handing each row to `on_row` keyed by `columns`.
    ///
    /// Returns the number of rows delivered.
    fn execute_query(
        &self,
        sql: &str,
        params: &[QueryParam],
        columns: &[String],
        on_row: &mut dyn FnMut(JsonObject) -> Result<()>,
    ) -> Result<u64>;

    /// Run a parameterized `SELECT COUNT(*)`-shaped statement
    fn query_count(&self, sql: &str, params: &[QueryParam]) -> Result<u64>;
}
