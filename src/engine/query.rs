//! SQL construction for stream extraction

use crate::database::{QueryParam, SourceDatabase};

/// A stream's extraction query before rendering
#[derive(Debug, Clone, Default)]
pub struct StreamQuery {
    /// Qualified, quoted table reference
    pub table: String,
    /// Selected columns
    pub columns: Vec<String>,
    /// Key column and the keys it must match
    pub key_filter: Option<(String, Vec<String>)>,
    /// Replication key column and the cursor it must exceed
    pub cursor: Option<(String, QueryParam)>,
    /// Ordering columns
    pub order_by: Vec<String>,
    /// Row cap for one invocation
    pub limit: Option<u64>,
}

impl StreamQuery {
    /// Render the SELECT statement and its parameters
    pub fn select_sql(&self, db: &dyn SourceDatabase) -> (String, Vec<QueryParam>) {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| db.quote_identifier(c))
            .collect();
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), self.table);
        let mut params = Vec::new();

        let mut conditions = Vec::new();
        if let Some((column, value)) = &self.cursor {
            conditions.push(format!("{} > ?", db.quote_identifier(column)));
            params.push(value.clone());
        }
        if let Some((column, keys)) = &self.key_filter {
            if keys.is_empty() {
                conditions.push("FALSE".to_string());
            } else {
                let placeholders = vec!["?"; keys.len()].join(", ");
                conditions.push(format!(
                    "{} IN ({placeholders})",
                    db.quote_identifier(column)
                ));
                params.extend(keys.iter().map(|k| QueryParam::from(k.as_str())));
            }
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|c| format!("{} ASC", db.quote_identifier(c)))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        (sql, params)
    }

    /// Render a COUNT over exactly the rows `select_sql` returns
    pub fn count_sql(&self, db: &dyn SourceDatabase) -> (String, Vec<QueryParam>) {
        let (select, params) = self.select_sql(db);
        (format!("SELECT COUNT(*) FROM ({select}) AS volume"), params)
    }
}
