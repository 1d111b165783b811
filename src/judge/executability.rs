//! Executability pre-check: `EXPLAIN` the candidate, and when that fails,
//! retry the statement itself with `LIMIT 0` appended.

use tracing::debug;

use crate::db::QueryExecutor;
use crate::judge::LayerVerdict;

const FIX_HINT: &str =
    "verify the table and column names exist and the statement is valid MySQL before regenerating";

pub async fn probe(executor: Option<&dyn QueryExecutor>, sql: &str) -> LayerVerdict {
    let Some(executor) = executor else {
        return LayerVerdict::fail("no database executor available for the executability pre-check");
    };
    let stripped = sql.trim().trim_end_matches(';').trim();
    if stripped.is_empty() {
        return LayerVerdict::fail("empty SQL statement cannot be executed");
    }

    // EXPLAIN succeeds with at least one plan row.
    let explain = format!("EXPLAIN {};", stripped);
    if let Ok(Some(rows)) = executor.execute_query(&explain).await {
        if !rows.is_empty() {
            return LayerVerdict::pass();
        }
    }
    debug!("EXPLAIN probe failed, retrying with LIMIT 0");

    // Fallback: run the statement with LIMIT 0 so nothing is materialized.
    let limited = if stripped.to_lowercase().contains(" limit ") {
        format!("{};", stripped)
    } else {
        format!("{} LIMIT 0;", stripped)
    };
    match executor.execute_query(&limited).await {
        Ok(Some(_)) => LayerVerdict::pass(),
        _ => LayerVerdict::fail_with_fix(
            "statement is not executable: both the EXPLAIN and LIMIT 0 probes failed",
            FIX_HINT,
        ),
    }
}
