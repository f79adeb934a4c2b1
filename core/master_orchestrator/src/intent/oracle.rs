//! Thin HTTP client for the LLM oracle the Intent Identifier consults
//! first. Mirrors the provider-call shape used by the standalone LLM
//! router worker, adapted to expect a structured routing decision back
//! instead of free text.

use crate::config::LlmOracleConfig;
use reqwest::Client;
use serde_json::json;
use shared_types::{AgentDescriptor, ConversationMessage, MessageRole, OracleIntentResponse};
use std::fmt;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

#[derive(Debug)]
pub enum OracleError {
    Transport(String),
    Http(u16, String),
    Parse(String),
}

impl OracleError {
    /// True when the oracle call failed because of rate limiting or quota
    /// exhaustion rather than a genuine outage — the caller must not
    /// interrogate the user about infrastructure trouble.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            OracleError::Http(429, _) => true,
            OracleError::Http(_, body) => {
                let lower = body.to_lowercase();
                lower.contains("rate limit") || lower.contains("quota")
            }
            _ => false,
        }
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::Transport(e) => write!(f, "oracle transport error: {e}"),
            OracleError::Http(status, body) => write!(f, "oracle returned HTTP {status}: {body}"),
            OracleError::Parse(e) => write!(f, "oracle response could not be parsed: {e}"),
        }
    }
}

/// Enumerates every registered agent plus the last ≤5 history turns so the
/// oracle has enough context to route or ask a targeted question.
pub fn build_prompt(agents: &[AgentDescriptor], history: &[ConversationMessage], query: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are an intent router for a multi-agent educational assistant. \
         Choose the single best agent for the user's request, or ask a clarifying \
         question if the request is ambiguous. Respond with JSON only, no markdown \
         fencing, matching this shape: {\"status\": \"READY_TO_ROUTE\" | \
         \"CLARIFICATION_NEEDED\", \"agent_id\": string|null, \"confidence\": number, \
         \"reasoning\": string, \"clarifying_questions\": [string], \
         \"extracted_params\": object, \"alternative_agents\": [string]}.\n\n",
    );

    prompt.push_str("Available agents:\n");
    for agent in agents {
        prompt.push_str(&format!(
            "- id: {}, name: {}, description: {}, capabilities: {:?}, keywords: {:?}, required_params: {:?}\n",
            agent.id, agent.name, agent.description, agent.capabilities, agent.keywords, agent.required_params
        ));
    }

    if !history.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in history.iter().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
            let speaker = match turn.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            prompt.push_str(&format!("{speaker}: {}\n", turn.content));
        }
    }

    prompt.push_str(&format!("\nCurrent request: {query}\n"));
    prompt
}

/// Strip a leading/trailing ```` ```json ```` fence if the model wrapped its
/// answer in one despite being told not to.
fn strip_markdown_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

pub async fn call(client: &Client, config: &LlmOracleConfig, prompt: &str) -> Result<OracleIntentResponse, OracleError> {
    let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    let api_key = config.api_key.as_deref().unwrap_or("");
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let body = json!({
        "model": model,
        "temperature": 0.1,
        "messages": [
            {"role": "user", "content": prompt}
        ]
    });

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&body)
        .send()
        .await
        .map_err(|e| OracleError::Transport(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        return Err(OracleError::Http(status, text));
    }

    let envelope: serde_json::Value = response.json().await.map_err(|e| OracleError::Parse(e.to_string()))?;
    let content = envelope["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| OracleError::Parse("no content in oracle response".to_string()))?;

    let stripped = strip_markdown_fence(content);
    serde_json::from_str::<OracleIntentResponse>(stripped).map_err(|e| OracleError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_markdown_fence_removes_json_fence() {
        let raw = "```json\n{\"status\":\"READY_TO_ROUTE\"}\n```";
        assert_eq!(strip_markdown_fence(raw), "{\"status\":\"READY_TO_ROUTE\"}");
    }

    #[test]
    fn strip_markdown_fence_passes_through_bare_json() {
        let raw = "{\"status\":\"READY_TO_ROUTE\"}";
        assert_eq!(strip_markdown_fence(raw), raw);
    }

    #[test]
    fn rate_limit_detected_from_status_code() {
        let err = OracleError::Http(429, "too many requests".to_string());
        assert!(err.is_rate_limited());
    }

    #[test]
    fn rate_limit_detected_from_quota_message() {
        let err = OracleError::Http(500, "you have exceeded your quota".to_string());
        assert!(err.is_rate_limited());
    }

    #[test]
    fn transport_error_is_not_a_rate_limit() {
        let err = OracleError::Transport("connection refused".to_string());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn build_prompt_includes_agent_ids_and_current_request() {
        let agents = vec![AgentDescriptor {
            id: "quiz_generator_agent".to_string(),
            name: "Quiz Generator".to_string(),
            url: "http://localhost:9001".to_string(),
            description: "makes quizzes".to_string(),
            capabilities: vec!["quiz".to_string()],
            keywords: vec!["quiz".to_string()],
            required_params: vec![],
            aliases: vec![],
            alternate_endpoint: None,
            status: shared_types::AgentStatus::Unknown,
            last_checked_at: None,
        }];
        let prompt = build_prompt(&agents, &[], "quiz me on loops");
        assert!(prompt.contains("quiz_generator_agent"));
        assert!(prompt.contains("quiz me on loops"));
    }
}
