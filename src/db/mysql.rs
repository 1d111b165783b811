//! sqlx-backed MySQL executor.
//!
//! Cell decoding walks an ordered list of type strategies; a column whose
//! type matches none of them decodes to JSON null rather than failing the
//! row.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row as SqlxRow};
use tracing::warn;

use crate::config::DbConfig;
use crate::db::{QueryExecutor, Row};
use crate::error::{Nl2SqlError, Result};

pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.connection_url())
            .await
            .map_err(|e| Nl2SqlError::Db(format!("Failed to connect to MySQL: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn decode_cell(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<sqlx::types::BigDecimal>, _>(idx) {
        return v
            .and_then(|d| d.to_string().parse::<f64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v.map(|d| Value::from(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v.map(|d| Value::from(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}

fn convert_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.push(column.name(), decode_cell(row, idx));
    }
    out
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    async fn execute_query(&self, sql: &str) -> Result<Option<Vec<Row>>> {
        match sqlx::query(sql).fetch_all(&self.pool).await {
            Ok(rows) => Ok(Some(rows.iter().map(convert_row).collect())),
            Err(e) => {
                warn!(sql, error = %e, "query failed");
                Ok(None)
            }
        }
    }
}
