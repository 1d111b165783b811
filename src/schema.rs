//! Schema Inspector: normalizes `SHOW FULL COLUMNS` output and samples
//! per-column distinct values.
//!
//! Everything here is rebuilt per request from the live database and
//! degrades to empty context on probe failure; a missing schema is never a
//! reason to abort the request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::{QueryExecutor, Row};
use crate::error::Result;

/// Ordered key strategies for introspection row fields; drivers disagree on
/// casing, so the first key that is present wins.
const NAME_KEYS: &[&str] = &["Field", "COLUMN_NAME", "field", "column_name"];
const TYPE_KEYS: &[&str] = &["Type", "COLUMN_TYPE", "type", "column_type"];
const NULL_KEYS: &[&str] = &["Null", "IS_NULLABLE", "null", "is_nullable"];
const KEY_KEYS: &[&str] = &["Key", "COLUMN_KEY", "key", "column_key"];
const DEFAULT_KEYS: &[&str] = &["Default", "COLUMN_DEFAULT", "default", "column_default"];
const COMMENT_KEYS: &[&str] = &["Comment", "COLUMN_COMMENT", "comment", "column_comment"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
    pub nullable: bool,
    pub key: String,
    pub default: Option<Value>,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnDescription>,
}

impl SchemaDescription {
    pub fn qualified_table(&self) -> String {
        format!("`{}`.`{}`", self.database, self.table)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Sampled distinct values for one column. `constrained` approximates "this
/// column is a closed enumeration": true iff the probe saw no more distinct
/// non-null values than the sampling limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueProfile {
    pub distinct: Vec<Value>,
    pub constrained: bool,
}

fn field_string(row: &Row, keys: &[&str]) -> String {
    match row.get_any(keys) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_nullable(raw: &str) -> bool {
    matches!(raw.to_uppercase().as_str(), "YES" | "Y" | "TRUE")
}

/// Fetch and normalize the table's column metadata. A failed or empty
/// introspection query yields a schema with no columns.
pub async fn fetch_schema(
    executor: &dyn QueryExecutor,
    database: &str,
    table: &str,
) -> Result<SchemaDescription> {
    let sql = format!("SHOW FULL COLUMNS FROM `{}`.`{}`;", database, table);
    let rows = executor.execute_query(&sql).await?.unwrap_or_default();
    if rows.is_empty() {
        warn!(database, table, "no column metadata available, continuing with empty schema");
    }

    let columns = rows
        .iter()
        .filter_map(|row| {
            let name = field_string(row, NAME_KEYS);
            if name.is_empty() {
                return None;
            }
            Some(ColumnDescription {
                name,
                declared_type: field_string(row, TYPE_KEYS),
                nullable: parse_nullable(&field_string(row, NULL_KEYS)),
                key: field_string(row, KEY_KEYS),
                default: row.get_any(DEFAULT_KEYS).filter(|v| !v.is_null()).cloned(),
                comment: field_string(row, COMMENT_KEYS),
            })
        })
        .collect();

    Ok(SchemaDescription {
        database: database.to_string(),
        table: table.to_string(),
        columns,
    })
}

/// Sample up to `limit` distinct non-null values per column. Best-effort:
/// a failed probe records an empty, unconstrained profile for that column.
pub async fn fetch_value_profiles(
    executor: &dyn QueryExecutor,
    schema: &SchemaDescription,
    limit: usize,
) -> HashMap<String, ValueProfile> {
    let mut profiles = HashMap::new();
    for column in &schema.columns {
        let sql = format!(
            "SELECT DISTINCT `{col}` FROM `{db}`.`{table}` WHERE `{col}` IS NOT NULL LIMIT {n};",
            col = column.name,
            db = schema.database,
            table = schema.table,
            n = limit + 1,
        );
        let profile = match executor.execute_query(&sql).await {
            Ok(Some(rows)) => {
                let mut distinct: Vec<Value> =
                    rows.iter().filter_map(|r| r.first().cloned()).collect();
                let constrained = distinct.len() <= limit;
                distinct.truncate(limit);
                ValueProfile { distinct, constrained }
            }
            Ok(None) | Err(_) => {
                debug!(column = %column.name, "distinct-value probe failed");
                ValueProfile::default()
            }
        };
        profiles.insert(column.name.clone(), profile);
    }
    profiles
}
