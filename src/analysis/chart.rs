//! Chart export: ask the gateway for a chart plan over the result set,
//! then write a renderer-agnostic JSON chart spec.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::db::Row;
use crate::error::{Nl2SqlError, Result};
use crate::llm::{assemble_last_text, parse_json_object, ChatMessage, CompletionGateway};

const MAX_POINTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
}

impl ChartType {
    fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
        }
    }
}

/// The gateway's visualization plan for one result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartPlan {
    pub chart_type: ChartType,
    pub x: Option<String>,
    pub y: Option<String>,
    /// Aggregation hint for the renderer ("sum" | "mean" | "count" | ...),
    /// carried through into the spec untouched.
    #[serde(default)]
    pub agg: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub x_label: Option<String>,
    #[serde(default)]
    pub y_label: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

const PLAN_SYSTEM_PROMPT: &str = r#"You plan one chart for a SQL result set, based on the user's request, a data summary, and the column list.

Output requirements:
- Respond with exactly one JSON object and nothing else.
- Keys: "chart_type" ("bar" | "line" | "pie"), "x" (column name or null), "y" (numeric column name or null), "agg" ("sum" | "mean" | "count" | "max" | "min" | null), "title" (string), "x_label" (string), "y_label" (string), "notes" (one short sentence).
- Pick "line" for time series, "pie" for share-of-total questions over few categories, "bar" otherwise."#;

/// Ask the gateway for a chart plan. Returns `None` on any failure — the
/// caller simply skips the chart.
pub async fn plan_chart(
    gateway: &dyn CompletionGateway,
    question: &str,
    summary: &str,
    columns: &[String],
) -> Option<ChartPlan> {
    let messages = vec![
        ChatMessage::system(PLAN_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "User request: {}\n\nData summary:\n{}\n\nColumns: {}\n\nReturn the strict JSON plan.",
            question,
            summary,
            columns.join(", ")
        )),
    ];
    let fragments = match gateway.complete(&messages, true).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "chart planning failed");
            return None;
        }
    };
    let text = assemble_last_text(&fragments);
    let value = parse_json_object(&text)?;
    match serde_json::from_value::<ChartPlan>(value) {
        Ok(plan) => Some(plan),
        Err(e) => {
            warn!(error = %e, "chart plan JSON did not match the contract");
            None
        }
    }
}

/// Write the chart spec JSON for the plan. Fails only when the plan names
/// columns the result set does not have.
pub fn create_chart(rows: &[Row], plan: &ChartPlan, output_dir: &Path) -> Result<PathBuf> {
    let x = plan.x.as_deref().unwrap_or_default();
    let y = plan.y.as_deref().unwrap_or_default();
    let has_column = |name: &str| rows.first().map(|r| r.get(name).is_some()).unwrap_or(false);
    if x.is_empty() || y.is_empty() || !has_column(x) || !has_column(y) {
        return Err(Nl2SqlError::Schema(format!(
            "chart plan references missing columns: x={:?}, y={:?}",
            plan.x, plan.y
        )));
    }

    let data: Vec<Value> = rows
        .iter()
        .take(MAX_POINTS)
        .map(|row| {
            let mut point = serde_json::Map::new();
            point.insert(x.to_string(), row.get(x).cloned().unwrap_or(Value::Null));
            point.insert(y.to_string(), row.get(y).cloned().unwrap_or(Value::Null));
            Value::Object(point)
        })
        .collect();

    let generated_at = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let payload = json!({
        "type": plan.chart_type.as_str(),
        "x": x,
        "y": y,
        "agg": plan.agg,
        "title": plan.title,
        "x_label": plan.x_label.clone().unwrap_or_else(|| x.to_string()),
        "y_label": plan.y_label.clone().unwrap_or_else(|| y.to_string()),
        "description": plan.notes,
        "generated_at": generated_at,
        "data": data,
    });

    std::fs::create_dir_all(output_dir)?;
    let file_name = format!(
        "{}_chart_{}.json",
        plan.chart_type.as_str(),
        &Uuid::new_v4().simple().to_string()[..8]
    );
    let path = output_dir.join(file_name);
    std::fs::write(&path, serde_json::to_string_pretty(&payload)?)?;
    Ok(path)
}
