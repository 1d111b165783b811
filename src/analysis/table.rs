//! Table export: the result set as a metadata-carrying JSON file a front
//! end can render directly.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::Row;
use crate::error::Result;

const MAX_ROWS: usize = 1000;

pub fn create_table(rows: &[Row], output_dir: &Path, title: &str) -> Result<PathBuf> {
    let columns: Vec<String> = rows
        .first()
        .map(|r| r.columns().map(str::to_string).collect())
        .unwrap_or_default();

    let displayed = rows.len().min(MAX_ROWS);
    let records: Vec<Value> = rows
        .iter()
        .take(MAX_ROWS)
        .map(|row| {
            let mut record = serde_json::Map::new();
            for column in &columns {
                record.insert(
                    column.clone(),
                    row.get(column).cloned().unwrap_or(Value::Null),
                );
            }
            Value::Object(record)
        })
        .collect();

    let created_at = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let payload = json!({
        "title": title,
        "columns": columns,
        "data": records,
        "metadata": {
            "total_rows": rows.len(),
            "displayed_rows": displayed,
            "total_columns": columns.len(),
            "truncated": rows.len() > MAX_ROWS,
            "created_at": created_at,
        }
    });

    std::fs::create_dir_all(output_dir)?;
    let file_name = format!("table_{}.json", &Uuid::new_v4().simple().to_string()[..8]);
    let path = output_dir.join(file_name);
    std::fs::write(&path, serde_json::to_string_pretty(&payload)?)?;
    Ok(path)
}
