//! SQL Generator: turns a (sub-)question plus live schema context into one
//! MySQL `SELECT` statement via the Completion Gateway.
//!
//! The generator never fails outward: any gateway problem degrades to an
//! empty string and the judge/loop machinery takes it from there.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, warn};

use crate::llm::{assemble_last_sql, assemble_last_text, ChatMessage, CompletionGateway};
use crate::schema::{SchemaDescription, ValueProfile};

/// Fixed rule set the completion must obey. The rules encode the ambiguity
/// policy for grouping words, per-group extrema, null-date semantics, and
/// numeric formatting; they are instructions to the model, not output.
const SQL_SYSTEM_PROMPT: &str = r#"You are a senior SQL assistant that translates natural-language questions into precise MySQL queries.

=============================
OUTPUT REQUIREMENTS
=============================
1) Output exactly one SQL statement. It must begin with SELECT and end with a semicolon. No explanations, no comments, no extra text.
2) The statement must be valid MySQL 8.0 syntax.
3) Use only the database, table, and column names provided. Never invent columns.
4) Wrap every identifier in backticks, e.g. `db`.`table`, `col`.

=============================
GENERATION RULES
=============================
1) LIMIT safety: never emit an unbounded query; if the user did not specify a row count, append LIMIT 1000.
2) Aggregation and grouping:
   - If the question implies aggregation (SUM/AVG/COUNT) together with wording like "each", "every", "per", "by X", "respectively", or "different", the query must contain GROUP BY.
   - The SELECT list must include both the grouping columns and the aggregated columns, and every non-aggregated selected column must appear in GROUP BY.
3) Precision: wrap AVG, SUM, and ratio expressions in ROUND(..., 2).
4) Null robustness: use COALESCE()/IFNULL() for nullable values and NULLIF(denominator, 0) for any division.
5) Date arithmetic: use TIMESTAMPDIFF() or DATEDIFF() for tenure, stay length, usage duration, and similar intervals. When the end date is NULL, do NOT blindly substitute CURDATE():
   - If the NULL means "still ongoing" (columns like leave_date, discharge_date, usage_end, or a status in ('active','in_progress','ongoing')), CURDATE() is the right substitute.
   - If the NULL means "data missing", "not yet recorded", or the row is a historical snapshot, keep it NULL or filter the row out.
6) Ordering and ranking:
   - "highest", "largest", "top", "top N" imply ORDER BY <metric> DESC; "lowest", "smallest", "bottom N" imply ASC.
   - "the highest X within each Y" is a per-group extremum: use a window function (ROW_NUMBER/RANK) partitioned by the group, or a correlated subquery with MAX/MIN. A bare "the highest X" with no grouping wording is a global extremum.
7) Column selection: list the needed columns explicitly; never SELECT *.
8) Aggregate filters go in HAVING; row-level filters go in WHERE.
9) Time series: wording like "per day/week/month/quarter/year" or "trend" requires selecting the time bucket and grouping by it.
10) Percentages: "share", "proportion", "contribution" use (numerator / NULLIF(denominator, 0)) * 100 wrapped in ROUND(..., 2).

=============================
DISAMBIGUATION RULES
=============================
A) "each", "every", "per", "respectively", "different", and "by X" all mean grouped aggregation; the query must GROUP BY the named dimension.
B) "the highest within each X" is NOT the same as "the highest": the former is a per-group extremum, the latter a global one. Never answer a per-group extremum with a flat ORDER BY ... LIMIT 1.
C) Per-group extrema must be written either as
   (1) ROW_NUMBER()/RANK() OVER (PARTITION BY group_col ORDER BY metric DESC/ASC) filtered to rank 1 in an outer query, or
   (2) a correlated subquery matching MAX()/MIN() per group.
   Use RANK() (not ROW_NUMBER()) when ties at the extremum must all be returned; never truncate ties to one row.
D) Global extrema use ORDER BY ... LIMIT 1 only when no grouping wording is present.
E) Negation wording: "not yet"/"without" maps to IS NULL or = 0; "already"/"has" maps to IS NOT NULL or > 0; "in progress" maps to start_date <= CURDATE() AND (end_date IS NULL OR end_date >= CURDATE()).

The rules above steer your reasoning only; the final output is the single SQL statement."#;

/// Prompt for the question-refinement pre-pass: rewrite a colloquial or
/// ambiguous question into one clarified sentence before SQL generation.
const REFINE_SYSTEM_PROMPT: &str = r#"You normalize natural-language data questions.

Task: rewrite the user's question into one clear, unambiguous sentence that a SQL generator can act on directly.

Requirements:
1) This is a standalone task; ignore any other context.
2) Output exactly one line of natural language. No SQL, no code fences, no explanations, no lists.
3) Do not invent table names, column names, or business assumptions; only make the existing wording explicit.
4) Preserve the user's intent but spell out, where the original is vague: the time range, Top-N or sort direction, the grouping ("per X"), the aggregate (average, total, count), and the filter scope.
5) Recognize these patterns:
   - "each/every/per/different X" means grouped aggregation over X;
   - "the highest/most/largest within each X" means a per-group extremum (top 1 per group);
   - "the highest/most/largest" with no grouping wording means a single global extremum.
6) Keep the answer in the same language as the question.

Examples:
Input: the department with the most doctors in each hospital
Output: For each hospital, count the doctors per department, then return the department with the highest doctor count within that hospital.

Input: the job title with the highest average salary
Output: Across all job titles, compute the average salary and return the job title with the highest average salary.

Input: monthly outpatient visits over the last year
Output: Count outpatient visits for each month of the past year and show how the monthly count changes over time."#;

pub struct SqlGenerator {
    gateway: Arc<dyn CompletionGateway>,
}

impl SqlGenerator {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }

    /// Rewrite the question into a clarified single sentence. Falls back to
    /// the original question on any gateway failure, an empty rewrite, or a
    /// rewrite that leaked SQL.
    pub async fn refine_question(&self, question: &str) -> String {
        if question.is_empty() {
            return question.to_string();
        }
        let messages = vec![
            ChatMessage::system(REFINE_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Original question: {}\n\nRewrite it as one clarified sentence. Output only that sentence.",
                question
            )),
        ];
        let fragments = match self.gateway.complete(&messages, true).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "question refinement failed, keeping original");
                return question.to_string();
            }
        };
        let text = assemble_last_text(&fragments);
        let trimmed = text.trim().trim_matches('`').trim();
        if trimmed.is_empty() {
            return question.to_string();
        }
        let lower = trimmed.to_lowercase();
        if ["select ", "insert ", "update ", "delete ", "create ", "drop "]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            return question.to_string();
        }
        let one_line = trimmed.split_whitespace().join(" ");
        debug!(refined = %one_line, "refined question");
        one_line
    }

    /// Produce one candidate statement for the question. Gateway failures
    /// yield an empty string, never an error.
    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaDescription,
        profiles: &HashMap<String, ValueProfile>,
        fix_suggestion: Option<&str>,
    ) -> String {
        let user_prompt = build_user_prompt(question, schema, profiles, fix_suggestion);
        let messages = vec![ChatMessage::system(SQL_SYSTEM_PROMPT), ChatMessage::user(user_prompt)];
        let fragments = match self.gateway.complete(&messages, true).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "SQL generation failed");
                return String::new();
            }
        };
        let sql = assemble_last_sql(&fragments);
        postprocess_sql(&sql, &schema.database, &schema.table)
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_user_prompt(
    question: &str,
    schema: &SchemaDescription,
    profiles: &HashMap<String, ValueProfile>,
    fix_suggestion: Option<&str>,
) -> String {
    let schema_text =
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| "{}".to_string());

    let mut value_lines = Vec::new();
    for column in &schema.columns {
        let Some(profile) = profiles.get(&column.name) else { continue };
        if profile.distinct.is_empty() {
            continue;
        }
        let values = profile.distinct.iter().map(display_value).join(", ");
        if profile.constrained {
            value_lines.push(format!(
                "Column `{}` allowed values: {} (pick only from these)",
                column.name, values
            ));
        } else {
            value_lines.push(format!(
                "Column `{}` sample distinct values: {} (open-ended)",
                column.name, values
            ));
        }
    }

    let mut prompt = format!(
        "User request: {}\n\nTable schema (from {}):\n{}\n\nColumn value hints:\n{}",
        question,
        schema.qualified_table(),
        schema_text,
        value_lines.join("\n"),
    );
    if let Some(fix) = fix_suggestion.filter(|f| !f.is_empty()) {
        prompt.push_str(&format!("\n\nMandatory correction (follow strictly): {}", fix));
    }
    prompt.push_str("\n\nGenerate one MySQL query satisfying the request. Output only the SQL.");
    prompt
}

/// Final SQL hygiene: exactly one trailing semicolon, and every bare
/// `` `table` `` reference rewritten to `` `db`.`table` ``. References that
/// already carry a qualifier are left untouched.
pub fn postprocess_sql(sql: &str, database: &str, table: &str) -> String {
    let mut sql = sql.trim().to_string();
    if sql.is_empty() {
        return sql;
    }
    while sql.ends_with(';') {
        sql.pop();
        while sql.ends_with(char::is_whitespace) {
            sql.pop();
        }
    }
    sql.push(';');
    qualify_table(&sql, database, table)
}

/// Rewrite bare `` `table` `` references to the fully qualified form. A
/// match immediately preceded by `.` is the table part of an existing
/// qualified reference and is never rewritten.
pub fn qualify_table(sql: &str, database: &str, table: &str) -> String {
    let bare = format!("`{}`", table);
    let qualified = format!("`{}`.`{}`", database, table);
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < sql.len() {
        if sql[i..].starts_with(&bare) {
            if i > 0 && bytes[i - 1] == b'.' {
                out.push_str(&bare);
            } else {
                out.push_str(&qualified);
            }
            i += bare.len();
            continue;
        }
        match sql[i..].chars().next() {
            Some(ch) => {
                out.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }
    out
}
