//! Query Decomposer: optionally split a compound question into an ordered
//! plan of sub-questions, the last of which restates the original intent.
//!
//! Every failure path degrades to a single-step plan holding the original
//! question; the plan is never empty.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::{assemble_last_text, parse_json_object, ChatMessage, CompletionGateway};

const DECOMPOSE_SYSTEM_PROMPT: &str = r#"You decide whether a natural-language data question should be split into an ordered sequence of simpler sub-questions.

Split only when the question genuinely chains several lookups (e.g. "find X, then use it to compute Y"). Most questions should NOT be split.

When splitting:
- each sub-question must be answerable with one SQL query over the same table;
- each sub-question refines context for the next;
- the final sub-question must restate the complete original intent.

Output requirements:
- Respond with exactly one JSON object and nothing else.
- Keys: "should_split" (boolean), "sub_questions" (array of strings, empty when should_split is false).
- String values must be single-line."#;

#[derive(Debug, Clone, Default, Deserialize)]
struct DecompositionPlan {
    #[serde(default)]
    should_split: bool,
    #[serde(default)]
    sub_questions: Vec<String>,
}

pub struct QueryDecomposer {
    gateway: Arc<dyn CompletionGateway>,
}

impl QueryDecomposer {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }

    /// Produce the ordered plan for a question. The result always has at
    /// least one entry.
    pub async fn plan(&self, question: &str) -> Vec<String> {
        let single = vec![question.to_string()];
        if question.trim().is_empty() {
            return single;
        }

        let messages = vec![
            ChatMessage::system(DECOMPOSE_SYSTEM_PROMPT),
            ChatMessage::user(format!("Question: {}\n\nReturn the strict JSON plan.", question)),
        ];
        let fragments = match self.gateway.complete(&messages, true).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "decomposition call failed, keeping single-step plan");
                return single;
            }
        };

        let text = assemble_last_text(&fragments);
        let Some(value) = parse_json_object(&text) else {
            return single;
        };
        let plan: DecompositionPlan = serde_json::from_value(value).unwrap_or_default();
        if !plan.should_split {
            return single;
        }
        let steps: Vec<String> = plan
            .sub_questions
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if steps.is_empty() {
            return single;
        }
        debug!(steps = steps.len(), "question decomposed");
        steps
    }
}
