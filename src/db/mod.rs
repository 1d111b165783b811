//! Database executor boundary: an ordered row record, the `QueryExecutor`
//! trait the core is written against, and the sqlx-backed MySQL
//! implementation.

pub mod mysql;

pub use mysql::MySqlExecutor;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One result row. Column order is preserved so single-column probes can
/// take the first cell without guessing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(cells: Vec<(String, Value)>) -> Self {
        Self { cells }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.cells.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cells.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Try each key in order, first hit wins. Used for introspection rows
    /// whose field names arrive under varying casings.
    pub fn get_any(&self, names: &[&str]) -> Option<&Value> {
        names.iter().find_map(|n| self.get(n))
    }

    pub fn first(&self) -> Option<&Value> {
        self.cells.first().map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.cells.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Query execution boundary. `Ok(None)` means the query failed or produced
/// nothing usable; the core degrades on it instead of erroring.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute_query(&self, sql: &str) -> Result<Option<Vec<Row>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_any_tries_keys_in_order() {
        let row = Row::from_pairs(vec![
            ("COLUMN_NAME".to_string(), json!("salary")),
            ("Type".to_string(), json!("decimal(10,2)")),
        ]);
        assert_eq!(row.get_any(&["Field", "COLUMN_NAME", "field"]), Some(&json!("salary")));
        assert_eq!(row.get_any(&["missing", "also_missing"]), None);
    }

    #[test]
    fn first_preserves_column_order() {
        let mut row = Row::new();
        row.push("a", json!(1));
        row.push("b", json!(2));
        assert_eq!(row.first(), Some(&json!(1)));
    }
}
