//! The Intent Identifier: decides which worker agent should handle a
//! request, extracting whatever structured parameters it can along the
//! way. Tries the LLM oracle first, falls back to keyword scoring on any
//! oracle trouble.

mod keyword;
mod oracle;

use crate::config::LlmOracleConfig;
use crate::registry::Registry;
use crate::shaper::{AgentKind, GENERIC_LLM_WRAPPER_AGENT_ID};
use reqwest::Client;
use shared_types::{
    AgentDescriptor, AgentId, ConversationMessage, IntentResult, OracleIntentResponse,
    ORACLE_STATUS_CLARIFY, ORACLE_STATUS_READY,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use oracle::OracleError;

pub struct IntentIdentifier {
    registry: Arc<Registry>,
    client: Client,
    oracle_config: LlmOracleConfig,
    route_threshold: f64,
    clarify_threshold: f64,
}

impl IntentIdentifier {
    pub fn new(registry: Arc<Registry>, oracle_config: LlmOracleConfig, route_threshold: f64, clarify_threshold: f64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(oracle_config.timeout_secs))
            .build()
            .expect("failed to build oracle HTTP client");
        IntentIdentifier {
            registry,
            client,
            oracle_config,
            route_threshold,
            clarify_threshold,
        }
    }

    pub async fn identify(&self, query: &str, history: &[ConversationMessage]) -> IntentResult {
        if query.trim().is_empty() {
            return empty_query_result();
        }

        let agents = self.registry.list();
        let prompt = oracle::build_prompt(&agents, history, query);

        match oracle::call(&self.client, &self.oracle_config, &prompt).await {
            Ok(resp) if resp.status == ORACLE_STATUS_READY || resp.status == ORACLE_STATUS_CLARIFY => {
                self.normalize_oracle_response(resp)
            }
            Ok(resp) => {
                warn!(status = %resp.status, "oracle returned an unrecognized status, falling back to keyword scoring");
                self.keyword_fallback(query, &agents, false)
            }
            Err(e) => {
                warn!(error = %e, "oracle call failed, falling back to keyword scoring");
                self.keyword_fallback(query, &agents, e.is_rate_limited())
            }
        }
    }

    fn normalize_oracle_response(&self, resp: OracleIntentResponse) -> IntentResult {
        let clarifying_questions: Vec<String> = resp.clarifying_questions.into_iter().map(|q| q.into_text()).collect();
        let mut reasoning = resp.reasoning.unwrap_or_default();
        let mut confidence = resp.confidence.unwrap_or(0.0).clamp(0.0, 1.0);

        let alternative_agents: Vec<AgentId> = resp
            .alternative_agents
            .iter()
            .filter_map(|a| self.registry.resolve_alias(a))
            .collect();

        let agent_id = match resp.agent_id.as_deref().and_then(|id| self.registry.resolve_alias(id)) {
            Some(resolved) => Some(resolved),
            None if resp.agent_id.is_some() => {
                reasoning = format!("oracle suggested an unknown agent, falling back to the generic assistant. {reasoning}");
                confidence = 0.5;
                Some(GENERIC_LLM_WRAPPER_AGENT_ID.to_string())
            }
            None => None,
        };

        let mut is_ambiguous = resp.status == ORACLE_STATUS_CLARIFY || confidence < self.clarify_threshold;

        if let Some(id) = &agent_id {
            let required = AgentKind::from_agent_id(id).required_params();
            if required.iter().any(|p| !resp.extracted_params.contains_key(*p)) {
                is_ambiguous = true;
            }
        }

        let mut clarifying_questions = clarifying_questions;
        if is_ambiguous && clarifying_questions.is_empty() {
            clarifying_questions.push("Could you share a bit more detail about what you need?".to_string());
        }

        IntentResult {
            agent_id,
            confidence,
            reasoning,
            is_ambiguous,
            clarifying_questions,
            extracted_params: resp.extracted_params,
            alternative_agents,
        }
    }

    /// Rate-limited calls always suppress clarification entirely; otherwise
    /// normal confidence gating applies, so a weak keyword match can still
    /// ask the user to clarify.
    fn keyword_fallback(&self, query: &str, agents: &[AgentDescriptor], rate_limited: bool) -> IntentResult {
        match keyword::score(query, agents) {
            Some((agent_id, hits)) => {
                let confidence = if rate_limited {
                    (0.3 * hits as f64).min(0.85)
                } else {
                    (0.2 * hits as f64).min(0.7)
                };
                IntentResult {
                    agent_id: Some(agent_id),
                    confidence,
                    reasoning: format!("matched {hits} keyword(s) while the routing oracle was unavailable"),
                    is_ambiguous: !rate_limited && confidence < self.clarify_threshold,
                    clarifying_questions: Vec::new(),
                    extracted_params: HashMap::new(),
                    alternative_agents: Vec::new(),
                }
            }
            None => IntentResult {
                agent_id: Some(GENERIC_LLM_WRAPPER_AGENT_ID.to_string()),
                confidence: 0.3,
                reasoning: "no keyword match while the routing oracle was unavailable, falling back to the generic assistant".to_string(),
                is_ambiguous: false,
                clarifying_questions: Vec::new(),
                extracted_params: HashMap::new(),
                alternative_agents: Vec::new(),
            },
        }
    }
}

fn empty_query_result() -> IntentResult {
    IntentResult {
        agent_id: None,
        confidence: 0.0,
        reasoning: "empty request".to_string(),
        is_ambiguous: true,
        clarifying_questions: vec!["What would you like help with?".to_string()],
        extracted_params: HashMap::new(),
        alternative_agents: Vec::new(),
    }
}
