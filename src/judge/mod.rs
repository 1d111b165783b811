//! SQL Judge: layered validation of one candidate statement.
//!
//! Layers run strictly in sequence — structure, semantic alignment,
//! explanation presence, executability, and (optionally) the similarity
//! cross-check. A layer's internal failure degrades to a failing verdict
//! for that layer with a descriptive error; it never aborts the pipeline.

pub mod executability;
pub mod semantic;
pub mod similarity;
pub mod syntax;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JudgeConfig;
use crate::db::QueryExecutor;
use crate::llm::CompletionGateway;
use crate::schema::SchemaDescription;

pub use semantic::SemanticReview;

/// One layer's outcome. A failing layer always carries at least one error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerVerdict {
    pub valid: bool,
    pub errors: Vec<String>,
    pub fix_suggestion: String,
}

impl LayerVerdict {
    pub fn pass() -> Self {
        Self { valid: true, errors: Vec::new(), fix_suggestion: String::new() }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { valid: false, errors: vec![error.into()], fix_suggestion: String::new() }
    }

    pub fn fail_with_fix(error: impl Into<String>, fix: impl Into<String>) -> Self {
        Self { valid: false, errors: vec![error.into()], fix_suggestion: fix.into() }
    }

    pub fn first_error(&self) -> Option<&str> {
        self.errors.iter().map(String::as_str).find(|e| !e.is_empty())
    }
}

/// Per-layer sub-verdicts, in pipeline order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerReport {
    pub syntax: Option<LayerVerdict>,
    pub semantic: LayerVerdict,
    pub explanation: LayerVerdict,
    pub executability: LayerVerdict,
    pub similarity: Option<LayerVerdict>,
}

impl LayerReport {
    fn ordered(&self) -> Vec<&LayerVerdict> {
        let mut layers = Vec::with_capacity(5);
        if let Some(syntax) = &self.syntax {
            layers.push(syntax);
        }
        layers.push(&self.semantic);
        layers.push(&self.explanation);
        layers.push(&self.executability);
        if let Some(similarity) = &self.similarity {
            layers.push(similarity);
        }
        layers
    }
}

/// The judge's structured accept/reject decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    pub reason: String,
    pub fix_suggestion: String,
    pub need_regenerate: bool,
    pub errors: Vec<String>,
    /// Plain-language explanation of what the SQL does, from the semantic
    /// layer.
    pub explanation: String,
    pub confidence: f64,
    pub layers: LayerReport,
}

impl Verdict {
    /// Fixed aggregation policy:
    /// - `valid` is the AND of all present layers;
    /// - `reason` is the first non-empty error in layer order (syntax,
    ///   semantic, explanation, executability, similarity);
    /// - `fix_suggestion` prefers the semantic layer's, then the
    ///   executability layer's, then the first aggregated error;
    /// - `errors` flattens every layer's errors in layer order.
    pub fn aggregate(layers: LayerReport, explanation: String, confidence: f64) -> Self {
        let ordered = layers.ordered();
        let valid = ordered.iter().all(|l| l.valid);
        let mut errors: Vec<String> = ordered
            .iter()
            .flat_map(|l| l.errors.iter())
            .filter(|e| !e.is_empty())
            .cloned()
            .collect();
        if !valid && errors.is_empty() {
            errors.push("statement rejected without a stated reason".to_string());
        }
        let reason = if valid { String::new() } else { errors[0].clone() };

        let fix_suggestion = [&layers.semantic.fix_suggestion, &layers.executability.fix_suggestion]
            .into_iter()
            .find(|f| !f.is_empty())
            .cloned()
            .unwrap_or_else(|| if valid { String::new() } else { errors[0].clone() });

        Self {
            valid,
            reason,
            fix_suggestion,
            need_regenerate: !valid,
            errors,
            explanation,
            confidence,
            layers,
        }
    }
}

pub struct SqlJudge {
    gateway: Arc<dyn CompletionGateway>,
    config: JudgeConfig,
}

impl SqlJudge {
    pub fn new(gateway: Arc<dyn CompletionGateway>, config: JudgeConfig) -> Self {
        Self { gateway, config }
    }

    /// Run every layer over the candidate and aggregate. Never returns an
    /// error and never panics on hostile input; a missing schema skips the
    /// schema-dependent structure checks and a missing executor fails the
    /// executability layer with a descriptive reason.
    pub async fn judge(
        &self,
        question: &str,
        sql: &str,
        schema: Option<&SchemaDescription>,
        executor: Option<&dyn QueryExecutor>,
    ) -> Verdict {
        let syntax = syntax::check(sql, schema);

        let (semantic_layer, review) =
            semantic::review(self.gateway.as_ref(), question, sql, schema).await;

        let explanation_layer = if review.sql_nl_explanation.trim().is_empty() {
            LayerVerdict::fail("semantic layer produced no explanation of what the SQL does")
        } else {
            LayerVerdict::pass()
        };

        let executability_layer = executability::probe(executor, sql).await;

        let similarity_layer = self.config.similarity_check.then(|| {
            similarity::check(
                question,
                &review.sql_nl_explanation,
                self.config.similarity_threshold,
            )
        });

        let layers = LayerReport {
            syntax: Some(syntax),
            semantic: semantic_layer,
            explanation: explanation_layer,
            executability: executability_layer,
            similarity: similarity_layer,
        };
        let verdict =
            Verdict::aggregate(layers, review.sql_nl_explanation, review.confidence);
        debug!(valid = verdict.valid, reason = %verdict.reason, "judged candidate");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_all_pass() {
        let layers = LayerReport {
            syntax: Some(LayerVerdict::pass()),
            semantic: LayerVerdict::pass(),
            explanation: LayerVerdict::pass(),
            executability: LayerVerdict::pass(),
            similarity: None,
        };
        let verdict = Verdict::aggregate(layers, "counts rows".to_string(), 0.9);
        assert!(verdict.valid);
        assert!(!verdict.need_regenerate);
        assert!(verdict.errors.is_empty());
        assert!(verdict.reason.is_empty());
    }

    #[test]
    fn need_regenerate_mirrors_invalidity_and_errors_are_nonempty() {
        let layers = LayerReport {
            syntax: Some(LayerVerdict::pass()),
            semantic: LayerVerdict::fail("missing GROUP BY"),
            explanation: LayerVerdict::pass(),
            executability: LayerVerdict::pass(),
            similarity: None,
        };
        let verdict = Verdict::aggregate(layers, "x".to_string(), 0.5);
        assert!(!verdict.valid);
        assert!(verdict.need_regenerate);
        assert!(!verdict.errors.is_empty());
        assert_eq!(verdict.reason, "missing GROUP BY");
    }

    #[test]
    fn reason_takes_syntax_error_first() {
        let layers = LayerReport {
            syntax: Some(LayerVerdict::fail("unknown column `user_id`")),
            semantic: LayerVerdict::fail("wrong aggregation"),
            explanation: LayerVerdict::pass(),
            executability: LayerVerdict::fail("EXPLAIN failed"),
            similarity: None,
        };
        let verdict = Verdict::aggregate(layers, String::new(), 0.0);
        assert_eq!(verdict.reason, "unknown column `user_id`");
        assert_eq!(
            verdict.errors,
            vec!["unknown column `user_id`", "wrong aggregation", "EXPLAIN failed"]
        );
    }

    #[test]
    fn fix_suggestion_prefers_semantic_then_executability_then_first_error() {
        let semantic_fix = LayerReport {
            syntax: Some(LayerVerdict::fail("bad column")),
            semantic: LayerVerdict::fail_with_fix("wrong grouping", "add GROUP BY `department`"),
            explanation: LayerVerdict::pass(),
            executability: LayerVerdict::fail_with_fix("probe failed", "check the table name"),
            similarity: None,
        };
        let verdict = Verdict::aggregate(semantic_fix, String::new(), 0.0);
        assert_eq!(verdict.fix_suggestion, "add GROUP BY `department`");

        let executability_fix = LayerReport {
            syntax: Some(LayerVerdict::pass()),
            semantic: LayerVerdict::pass(),
            explanation: LayerVerdict::pass(),
            executability: LayerVerdict::fail_with_fix("probe failed", "check the table name"),
            similarity: None,
        };
        let verdict = Verdict::aggregate(executability_fix, String::new(), 0.0);
        assert_eq!(verdict.fix_suggestion, "check the table name");

        let no_fix = LayerReport {
            syntax: Some(LayerVerdict::fail("parse error near FROM")),
            semantic: LayerVerdict::pass(),
            explanation: LayerVerdict::pass(),
            executability: LayerVerdict::pass(),
            similarity: None,
        };
        let verdict = Verdict::aggregate(no_fix, String::new(), 0.0);
        assert_eq!(verdict.fix_suggestion, "parse error near FROM");
    }

    #[test]
    fn rejection_without_stated_reason_still_reports_an_error() {
        let layers = LayerReport {
            syntax: Some(LayerVerdict::pass()),
            semantic: LayerVerdict { valid: false, errors: Vec::new(), fix_suggestion: String::new() },
            explanation: LayerVerdict::pass(),
            executability: LayerVerdict::pass(),
            similarity: None,
        };
        let verdict = Verdict::aggregate(layers, String::new(), 0.0);
        assert!(!verdict.valid);
        assert!(!verdict.errors.is_empty());
        assert!(!verdict.reason.is_empty());
    }
}
