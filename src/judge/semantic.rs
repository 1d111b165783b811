//! Semantic-alignment layer: ask the Completion Gateway whether the SQL
//! answers the question, and collect a plain-language explanation of what
//! the SQL does.
//!
//! The response must be a single strict JSON object; parsing is defensive
//! and an unusable response degrades to a failing layer verdict.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::judge::LayerVerdict;
use crate::llm::{assemble_last_text, parse_json_object, ChatMessage, CompletionGateway};
use crate::schema::SchemaDescription;

const JUDGE_SYSTEM_PROMPT: &str = r#"You are a senior SQL reviewer for MySQL 8.0.

Task: decide whether the candidate SQL faithfully answers the user's question, and explain in plain language what the SQL actually does.

Check, in particular:
- grouping intent: wording like "each", "every", "per", "by X" requires GROUP BY over that dimension;
- aggregation direction and type (average vs. total vs. count);
- filter completeness: every condition stated in the question must appear in the SQL;
- time-range interpretation ("last year", "this month", "so far");
- sort direction: "highest"/"top" must sort descending, "lowest" ascending;
- per-group extrema ("the highest within each X") must use a window function or correlated subquery, never a flat ORDER BY ... LIMIT;
- field disambiguation: the selected columns must be the ones the question asks about.

Also treat MySQL capability violations as failures: unsupported keywords, aggregate functions nested directly inside aggregate functions, or correlated subquery shapes MySQL cannot execute.

Output requirements:
- Respond with exactly one JSON object and nothing else.
- Keys: "semantic_valid" (boolean), "semantic_reason" (string), "sql_nl_explanation" (string), "fix_suggestion" (string), "confidence" (number between 0.0 and 1.0).
- Every key must be present even when empty. String values must be single-line.
- "sql_nl_explanation" describes what the SQL does, in the question's language.
- When semantic_valid is false, "fix_suggestion" tells the generator precisely what to change."#;

/// The semantic layer's parsed response. Field names mirror the wire
/// contract exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticReview {
    #[serde(default)]
    pub semantic_valid: bool,
    #[serde(default)]
    pub semantic_reason: String,
    #[serde(default)]
    pub sql_nl_explanation: String,
    #[serde(default)]
    pub fix_suggestion: String,
    #[serde(default)]
    pub confidence: f64,
}

fn build_user_prompt(question: &str, sql: &str, schema: Option<&SchemaDescription>) -> String {
    let schema_text = schema
        .map(|s| serde_json::to_string_pretty(s).unwrap_or_else(|_| "{}".to_string()))
        .unwrap_or_else(|| "(schema unavailable)".to_string());
    format!(
        "User question: {}\n\nCandidate SQL:\n{}\n\nTable schema:\n{}\n\nReturn the strict JSON verdict.",
        question, sql, schema_text
    )
}

/// Run the semantic check. Always returns a layer verdict plus the parsed
/// review (defaulted on failure); never propagates an error.
pub async fn review(
    gateway: &dyn CompletionGateway,
    question: &str,
    sql: &str,
    schema: Option<&SchemaDescription>,
) -> (LayerVerdict, SemanticReview) {
    if sql.trim().is_empty() {
        return (
            LayerVerdict::fail_with_fix(
                "no SQL was produced for this question",
                "generate one SELECT statement ending with a semicolon",
            ),
            SemanticReview::default(),
        );
    }

    let messages = vec![
        ChatMessage::system(JUDGE_SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(question, sql, schema)),
    ];

    let fragments = match gateway.complete(&messages, true).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "semantic judge call failed");
            return (
                LayerVerdict::fail(format!("semantic judge unavailable: {}", e)),
                SemanticReview::default(),
            );
        }
    };

    let text = assemble_last_text(&fragments);
    let Some(value) = parse_json_object(&text) else {
        return (
            LayerVerdict::fail_with_fix(
                "semantic judge did not return parsable JSON",
                "check the SQL's GROUP BY/HAVING/WHERE, column existence, and alignment with the question",
            ),
            SemanticReview::default(),
        );
    };

    let review: SemanticReview = serde_json::from_value(value).unwrap_or_default();

    let verdict = if review.semantic_valid {
        LayerVerdict::pass()
    } else {
        let reason = if review.semantic_reason.is_empty() {
            "semantic check rejected the statement".to_string()
        } else {
            review.semantic_reason.clone()
        };
        LayerVerdict { valid: false, errors: vec![reason], fix_suggestion: review.fix_suggestion.clone() }
    };

    (verdict, review)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::Fragment;
    use async_trait::async_trait;

    struct CannedGateway(String);

    #[async_trait]
    impl CompletionGateway for CannedGateway {
        async fn complete(&self, _messages: &[ChatMessage], _stream: bool) -> Result<Vec<Fragment>> {
            Ok(vec![Fragment::Text(self.0.clone())])
        }
    }

    #[tokio::test]
    async fn valid_json_verdict_is_parsed() {
        let gateway = CannedGateway(
            r#"{"semantic_valid": true, "semantic_reason": "", "sql_nl_explanation": "Averages salary per department.", "fix_suggestion": "", "confidence": 0.93}"#
                .to_string(),
        );
        let (verdict, review) =
            review(&gateway, "average salary per department", "SELECT 1;", None).await;
        assert!(verdict.valid);
        assert_eq!(review.sql_nl_explanation, "Averages salary per department.");
        assert!((review.confidence - 0.93).abs() < 1e-9);
    }

    #[tokio::test]
    async fn prose_response_degrades_to_parse_failure() {
        let gateway = CannedGateway("Sure, here's the analysis: looks good to me!".to_string());
        let (verdict, review) = review(&gateway, "q", "SELECT 1;", None).await;
        assert!(!verdict.valid);
        assert!(verdict.errors.iter().any(|e| e.contains("JSON")));
        assert!(review.sql_nl_explanation.is_empty());
    }

    #[tokio::test]
    async fn rejection_carries_reason_and_fix() {
        let gateway = CannedGateway(
            r#"{"semantic_valid": false, "semantic_reason": "question asks for per-department averages but the SQL has no GROUP BY", "sql_nl_explanation": "Averages salary over the whole table.", "fix_suggestion": "group by `department` and aggregate `salary`", "confidence": 0.88}"#
                .to_string(),
        );
        let (verdict, _) = review(&gateway, "q", "SELECT AVG(`salary`) FROM `t`;", None).await;
        assert!(!verdict.valid);
        assert!(verdict.errors[0].contains("GROUP BY"));
        assert!(verdict.fix_suggestion.contains("group by"));
    }

    #[tokio::test]
    async fn empty_sql_short_circuits() {
        let gateway = CannedGateway(String::new());
        let (verdict, _) = review(&gateway, "q", "   ", None).await;
        assert!(!verdict.valid);
        assert!(verdict.errors[0].contains("no SQL"));
    }
}
