//! Completion Gateway: the chat-completions client and the fragment
//! assembly contract shared by every LLM-backed component.
//!
//! The gateway is an opaque text-completion service. Callers hand it a
//! message list and get back a sequence of fragments; only the final
//! assembled text matters downstream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LlmConfig;
use crate::error::{Nl2SqlError, Result};

/// Sentinel separating fragments during assembly. Picked so it cannot occur
/// inside model output by accident.
const FRAGMENT_DELIM: &str = "\n<CHUNK_END>\n";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// One piece of a completion response. Structured fragments carry the
/// loosely-typed record shape some endpoints emit (`content` and/or
/// `reasoning_content`, either possibly absent).
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text(String),
    Structured { content: Option<String>, reasoning_content: Option<String> },
}

impl Fragment {
    /// Extract the fragment's text. Total over the variant: a structured
    /// fragment prefers `content`, falls back to `reasoning_content`, and
    /// yields `None` when both are absent or empty.
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::Text(s) => (!s.is_empty()).then_some(s.as_str()),
            Fragment::Structured { content, reasoning_content } => content
                .as_deref()
                .filter(|s| !s.is_empty())
                .or_else(|| reasoning_content.as_deref().filter(|s| !s.is_empty())),
        }
    }
}

/// Join every non-empty fragment with the sentinel, split the sentinel back
/// out, drop blank pieces, and keep the last one. This is the whole
/// assembly contract: intermediate reasoning chunks are discarded and the
/// final piece wins.
pub fn assemble_last_text(fragments: &[Fragment]) -> String {
    let joined = fragments
        .iter()
        .filter_map(Fragment::text)
        .collect::<Vec<_>>()
        .join(FRAGMENT_DELIM);
    joined
        .split(FRAGMENT_DELIM)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .last()
        .unwrap_or("")
        .to_string()
}

/// Assembly for SQL-producing calls: same last-piece rule, then truncate at
/// the last semicolon (inclusive), discarding trailing commentary.
pub fn assemble_last_sql(fragments: &[Fragment]) -> String {
    let text = assemble_last_text(fragments);
    match text.rfind(';') {
        Some(idx) => text[..=idx].trim().to_string(),
        None => text,
    }
}

/// Defensive JSON extraction for completion text that should be a single
/// object. Ordered strategies, first success wins: direct parse, code-fence
/// strip, then a scan from the first `{` to the last `}`. Returns `None`
/// when no strategy yields a JSON object.
pub fn parse_json_object(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Ok(fence) = regex::Regex::new(r"(?s)^```(?:json)?\s*\n(.*?)\n```\s*$") {
        if let Some(captures) = fence.captures(trimmed) {
            if let Ok(value @ serde_json::Value::Object(_)) =
                serde_json::from_str(captures[1].trim())
            {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Run one completion. `stream` is a delivery hint; implementations may
    /// return the response as a single fragment.
    async fn complete(&self, messages: &[ChatMessage], stream: bool) -> Result<Vec<Fragment>>;
}

/// Chat-completions client for any OpenAI-compatible server (vLLM, SGLang,
/// OpenAI itself).
pub struct OpenAiGateway {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiGateway {
    pub fn new(config: LlmConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    async fn complete(&self, messages: &[ChatMessage], _stream: bool) -> Result<Vec<Fragment>> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "max_tokens": self.config.max_tokens,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Nl2SqlError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Nl2SqlError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(Nl2SqlError::Llm(format!("LLM API error: {}", error)));
        }

        let choices = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Nl2SqlError::Llm("No choices in LLM response".to_string()))?;

        let message = &choices[0]["message"];
        if let Some(finish_reason) = choices[0].get("finish_reason").and_then(|r| r.as_str()) {
            if finish_reason == "length" {
                warn!("LLM response truncated at the token limit");
            }
        }

        let content = message.get("content").and_then(|c| c.as_str()).map(str::to_string);
        let reasoning_content = message
            .get("reasoning_content")
            .and_then(|c| c.as_str())
            .map(str::to_string);

        if content.is_none() && reasoning_content.is_none() {
            return Err(Nl2SqlError::Llm("No content in LLM response".to_string()));
        }

        Ok(vec![Fragment::Structured { content, reasoning_content }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_fragment_wins() {
        let fragments = vec![
            Fragment::Text("thinking about it".to_string()),
            Fragment::Text("SELECT 1;".to_string()),
        ];
        assert_eq!(assemble_last_text(&fragments), "SELECT 1;");
    }

    #[test]
    fn structured_fragment_prefers_content_over_reasoning() {
        let fragment = Fragment::Structured {
            content: Some("answer".to_string()),
            reasoning_content: Some("chain of thought".to_string()),
        };
        assert_eq!(fragment.text(), Some("answer"));
    }

    #[test]
    fn structured_fragment_falls_back_to_reasoning() {
        let fragment = Fragment::Structured {
            content: None,
            reasoning_content: Some("draft".to_string()),
        };
        assert_eq!(fragment.text(), Some("draft"));
    }

    #[test]
    fn empty_fragments_are_skipped() {
        let fragments = vec![
            Fragment::Text(String::new()),
            Fragment::Structured { content: None, reasoning_content: None },
            Fragment::Text("  final  ".to_string()),
        ];
        assert_eq!(assemble_last_text(&fragments), "final");
    }

    #[test]
    fn empty_sequence_assembles_to_empty() {
        assert_eq!(assemble_last_text(&[]), "");
        assert_eq!(assemble_last_sql(&[]), "");
    }

    #[test]
    fn sql_assembly_truncates_at_last_semicolon() {
        let fragments = vec![Fragment::Text(
            "SELECT `a` FROM `t`; -- hope that helps!".to_string(),
        )];
        assert_eq!(assemble_last_sql(&fragments), "SELECT `a` FROM `t`;");
    }

    #[test]
    fn sql_assembly_without_semicolon_keeps_text() {
        let fragments = vec![Fragment::Text("SELECT 1".to_string())];
        assert_eq!(assemble_last_sql(&fragments), "SELECT 1");
    }

    #[test]
    fn json_object_parses_directly() {
        let value = parse_json_object(r#"{"valid": true}"#).unwrap();
        assert_eq!(value["valid"], serde_json::json!(true));
    }

    #[test]
    fn json_object_strips_code_fences() {
        let value = parse_json_object("```json\n{\"valid\": false}\n```").unwrap();
        assert_eq!(value["valid"], serde_json::json!(false));
    }

    #[test]
    fn json_object_falls_back_to_brace_scan() {
        let text = "Sure, here's the verdict: {\"valid\": true, \"reason\": \"\"} hope that helps";
        let value = parse_json_object(text).unwrap();
        assert_eq!(value["valid"], serde_json::json!(true));
    }

    #[test]
    fn prose_without_json_yields_none() {
        assert!(parse_json_object("Sure, here's the analysis: it looks fine").is_none());
        assert!(parse_json_object("").is_none());
        assert!(parse_json_object("[1, 2, 3]").is_none());
    }
}
