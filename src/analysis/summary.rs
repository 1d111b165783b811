//! Text overview of a result set: columns, row count, numeric ranges, and
//! a small preview.

use serde_json::Value;

use crate::db::Row;

const PREVIEW_ROWS: usize = 10;
const MAX_NUMERIC_STATS: usize = 20;

pub fn data_summary(rows: &[Row]) -> String {
    let columns: Vec<String> = rows
        .first()
        .map(|r| r.columns().map(str::to_string).collect())
        .unwrap_or_default();

    let mut lines = Vec::new();
    lines.push(format!("columns: [{}]", columns.join(", ")));
    lines.push(format!("rows: {}", rows.len()));

    let mut stats = Vec::new();
    for column in &columns {
        let numbers: Vec<f64> = rows
            .iter()
            .filter_map(|r| r.get(column))
            .filter_map(Value::as_f64)
            .collect();
        if numbers.is_empty() {
            continue;
        }
        let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = numbers.iter().sum();
        stats.push(format!("- {} (numeric): min={}, max={}, sum={}", column, min, max, sum));
    }
    if !stats.is_empty() {
        lines.push("numeric column ranges:".to_string());
        stats.truncate(MAX_NUMERIC_STATS);
        lines.extend(stats);
    }

    lines.push("preview:".to_string());
    if rows.is_empty() {
        lines.push("(no rows)".to_string());
    } else {
        lines.push(columns.join(" | "));
        for row in rows.iter().take(PREVIEW_ROWS) {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| row.get(c).map(render_cell).unwrap_or_default())
                .collect();
            lines.push(cells.join(" | "));
        }
    }

    lines.join("\n")
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_reports_counts_and_numeric_ranges() {
        let rows = vec![
            Row::from_pairs(vec![
                ("department".to_string(), json!("sales")),
                ("salary".to_string(), json!(100.0)),
            ]),
            Row::from_pairs(vec![
                ("department".to_string(), json!("eng")),
                ("salary".to_string(), json!(200.0)),
            ]),
        ];
        let summary = data_summary(&rows);
        assert!(summary.contains("rows: 2"));
        assert!(summary.contains("salary (numeric): min=100, max=200, sum=300"));
        assert!(summary.contains("sales"));
    }

    #[test]
    fn empty_result_set_is_handled() {
        let summary = data_summary(&[]);
        assert!(summary.contains("rows: 0"));
        assert!(summary.contains("(no rows)"));
    }
}
