//! The entry point: Registry -> Intent Identifier -> Clarification Gate ->
//! Payload Shaper -> Dispatcher -> Memory, with the livelock escape hatch
//! and the alternative-agent health fallback.

use crate::config::SupervisorConfig;
use crate::dispatcher::Dispatcher;
use crate::intent::IntentIdentifier;
use crate::memory::ConversationMemory;
use crate::registry::Registry;
use crate::shaper::{shape_payload, GENERIC_LLM_WRAPPER_AGENT_ID};
use serde_json::{json, Value};
use shared_types::{
    AgentStatus, ClarificationEnvelope, IntentResult, MessageRole, RequestResponse, ResponseMetadata,
    SupervisorReply,
};
use std::sync::Arc;
use tracing::info;

pub struct Orchestrator {
    registry: Arc<Registry>,
    intent_identifier: Arc<IntentIdentifier>,
    dispatcher: Arc<Dispatcher>,
    memory: Arc<ConversationMemory>,
    max_clarification_attempts: u32,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        intent_identifier: Arc<IntentIdentifier>,
        dispatcher: Arc<Dispatcher>,
        memory: Arc<ConversationMemory>,
        config: &SupervisorConfig,
    ) -> Self {
        Orchestrator {
            registry,
            intent_identifier,
            dispatcher,
            memory,
            max_clarification_attempts: config.max_clarification_attempts,
            history_limit: config.conversation_history_limit,
        }
    }

    pub async fn handle(&self, user_id: &str, request: &str, explicit_agent_id: Option<&str>, auto_route: bool) -> SupervisorReply {
        self.memory.append(user_id, MessageRole::User, request.to_string(), None, None).await;

        let clarification_streak = self.memory.trailing_clarification_count(user_id).await;

        let intent = if clarification_streak >= self.max_clarification_attempts {
            info!(user_id, clarification_streak, "forcing route after repeated clarification turns");
            IntentResult {
                agent_id: Some(GENERIC_LLM_WRAPPER_AGENT_ID.to_string()),
                confidence: 0.5,
                reasoning: "Query remains unclear after multiple clarification attempts.".to_string(),
                is_ambiguous: false,
                clarifying_questions: Vec::new(),
                extracted_params: Default::default(),
                alternative_agents: Vec::new(),
            }
        } else if let (Some(agent_id), false) = (explicit_agent_id, auto_route) {
            if self.registry.contains(agent_id) {
                IntentResult {
                    agent_id: Some(agent_id.to_string()),
                    confidence: 1.0,
                    reasoning: "explicit agent selection, routing skipped".to_string(),
                    is_ambiguous: false,
                    clarifying_questions: Vec::new(),
                    extracted_params: Default::default(),
                    alternative_agents: Vec::new(),
                }
            } else {
                info!(user_id, agent_id, "explicit agentId not found in registry, falling back to identification");
                let history = self.memory.history(user_id, self.history_limit).await;
                self.intent_identifier.identify(request, &history).await
            }
        } else {
            let history = self.memory.history(user_id, self.history_limit).await;
            self.intent_identifier.identify(request, &history).await
        };

        if intent.is_ambiguous {
            return self.respond_with_clarification(user_id, intent, clarification_streak + 1).await;
        }

        let Some(selected_agent) = self.select_healthy_agent(intent.agent_id.as_deref(), &intent.alternative_agents) else {
            return self.respond_with_offline_message(user_id, &intent).await;
        };

        let shaped = shape_payload(&selected_agent, request, &intent.extracted_params);
        let mut response = self.dispatcher.forward(&selected_agent, request, shaped).await;

        if response.error.as_ref().map(|e| e.code) == Some(shared_types::SupervisorErrorCode::ClarificationNeeded) {
            let questions = response
                .error
                .as_ref()
                .and_then(|e| e.details.as_ref())
                .and_then(|d| d.get("clarifying_questions"))
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect::<Vec<_>>())
                .unwrap_or_default();

            let mut clarify_intent = intent.clone();
            clarify_intent.clarifying_questions = questions;
            clarify_intent.is_ambiguous = true;
            return self.respond_with_clarification(user_id, clarify_intent, clarification_streak + 1).await;
        }

        self.memory
            .append(
                user_id,
                MessageRole::Assistant,
                response.response.clone(),
                response.agent_id.clone(),
                Some(json!({"confidence": intent.confidence, "reasoning": intent.reasoning})),
            )
            .await;

        let history_len = self.merge_metadata(&mut response, &intent, user_id).await;
        response.metadata.conversation_length = history_len;

        SupervisorReply::Response(response)
    }

    /// Prefer the primary pick if healthy; otherwise scan `alternative_agents`
    /// for the first healthy one.
    fn select_healthy_agent(&self, primary: Option<&str>, alternatives: &[String]) -> Option<String> {
        let primary = primary?;
        if let Some(descriptor) = self.registry.get(primary) {
            if descriptor.status == AgentStatus::Healthy || descriptor.status == AgentStatus::Unknown {
                return Some(descriptor.id);
            }
        }
        alternatives.iter().find_map(|candidate| {
            self.registry.get(candidate).filter(|d| d.status == AgentStatus::Healthy).map(|d| d.id)
        })
    }

    async fn respond_with_clarification(&self, user_id: &str, intent: IntentResult, clarification_count: u32) -> SupervisorReply {
        let envelope = ClarificationEnvelope::new(
            "please provide a bit more detail so I can route your request".to_string(),
            intent.clarifying_questions.clone(),
            intent.clone(),
            clarification_count,
            self.max_clarification_attempts,
        );

        self.memory
            .append(user_id, MessageRole::Assistant, envelope.message.clone(), None, Some(json!(intent)))
            .await;

        SupervisorReply::Clarification(envelope)
    }

    async fn respond_with_offline_message(&self, user_id: &str, intent: &IntentResult) -> SupervisorReply {
        let message = match &intent.agent_id {
            Some(id) => format!("{id} is currently offline and no healthy alternative is available"),
            None => "no agent is currently available to handle this request".to_string(),
        };

        self.memory.append(user_id, MessageRole::Assistant, message.clone(), None, None).await;

        let mut metadata = ResponseMetadata::default();
        metadata.identified_agent = intent.agent_id.clone();
        metadata.confidence = Some(intent.confidence);
        metadata.reasoning = Some(intent.reasoning.clone());
        metadata.conversation_length = self.memory.summary(user_id).await.message_count;

        SupervisorReply::Response(RequestResponse {
            response: message.clone(),
            structured_output: None,
            agent_id: intent.agent_id.clone(),
            timestamp: chrono::Utc::now(),
            error: Some(shared_types::ResponseError {
                code: shared_types::SupervisorErrorCode::AgentOffline,
                message,
                details: None,
            }),
            metadata,
        })
    }

    /// Merges supervisor-level routing metadata into the worker's own
    /// metadata and returns the caller's conversation length for the
    /// caller to stamp onto the response.
    async fn merge_metadata(&self, response: &mut RequestResponse, intent: &IntentResult, user_id: &str) -> usize {
        response.metadata.identified_agent = intent.agent_id.clone();
        response.metadata.confidence = Some(intent.confidence);
        response.metadata.reasoning = Some(intent.reasoning.clone());
        response.metadata.extracted_params = intent.extracted_params.clone();
        if let Some(id) = &response.agent_id {
            if !response.metadata.agent_trace.contains(id) {
                response.metadata.agent_trace.push(id.clone());
            }
            if !response.metadata.participating_agents.contains(id) {
                response.metadata.participating_agents.push(id.clone());
            }
            if let Some(descriptor) = self.registry.get(id) {
                response.metadata.agent_name = Some(descriptor.name);
            }
        }
        self.memory.summary(user_id).await.message_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmOracleConfig;
    use crate::debug_store::DebugStore;
    use crate::health::HealthProber;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn build_orchestrator(registry: Arc<Registry>) -> Orchestrator {
        let health = Arc::new(HealthProber::new(registry.clone(), 1, 15));
        let debug_store = Arc::new(DebugStore::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), health, debug_store, 5, 10));
        let intent_identifier = Arc::new(IntentIdentifier::new(
            registry.clone(),
            LlmOracleConfig { base_url: Some("http://127.0.0.1:1".to_string()), ..Default::default() },
            0.6,
            0.4,
        ));
        let memory = Arc::new(ConversationMemory::new());
        let config = SupervisorConfig::default();
        Orchestrator::new(registry, intent_identifier, dispatcher, memory, &config)
    }

    fn registry_with(url: &str) -> Arc<Registry> {
        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"[{{"id":"quiz_generator_agent","name":"Quiz Generator","url":"{url}","description":"d","keywords":["quiz"]}}]"#
        )
        .unwrap();
        Arc::new(Registry::load(f.path().to_str().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn empty_request_produces_a_clarification_envelope() {
        let registry = registry_with("http://127.0.0.1:1");
        let orchestrator = build_orchestrator(registry);
        match orchestrator.handle("alice", "", None, true).await {
            SupervisorReply::Clarification(envelope) => {
                assert_eq!(envelope.clarification_count, 1);
                assert_eq!(envelope.max_clarifications, 3);
            }
            SupervisorReply::Response(_) => panic!("expected a clarification envelope"),
        }
    }

    #[tokio::test]
    async fn successful_route_dispatches_and_merges_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "results": {"output": "your quiz is ready"}
            })))
            .mount(&server)
            .await;

        let registry = registry_with(&server.uri());
        let orchestrator = build_orchestrator(registry);
        match orchestrator.handle("bob", "please quiz me", Some("quiz_generator_agent"), false).await {
            SupervisorReply::Response(response) => {
                assert_eq!(response.response, "your quiz is ready");
                assert_eq!(response.metadata.identified_agent.as_deref(), Some("quiz_generator_agent"));
                assert_eq!(response.metadata.conversation_length, 2);
            }
            SupervisorReply::Clarification(_) => panic!("expected a dispatched response"),
        }
    }

    #[tokio::test]
    async fn unknown_explicit_agent_id_falls_back_to_identification_instead_of_erroring() {
        let oracle_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": json!({
                    "status": "ROUTED",
                    "agent_id": "quiz_generator_agent",
                    "confidence": 0.95,
                    "reasoning": "matched quiz keywords",
                    "clarifying_questions": [],
                    "extracted_params": {},
                    "alternative_agents": []
                }).to_string()}}]
            })))
            .mount(&oracle_server)
            .await;

        let worker_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&worker_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "results": {"output": "your quiz is ready"}
            })))
            .mount(&worker_server)
            .await;

        let registry = registry_with(&worker_server.uri());
        let health = Arc::new(HealthProber::new(registry.clone(), 1, 15));
        let debug_store = Arc::new(DebugStore::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), health, debug_store, 5, 10));
        let intent_identifier = Arc::new(IntentIdentifier::new(
            registry.clone(),
            LlmOracleConfig { base_url: Some(oracle_server.uri()), ..Default::default() },
            0.6,
            0.4,
        ));
        let memory = Arc::new(ConversationMemory::new());
        let config = SupervisorConfig::default();
        let orchestrator = Orchestrator::new(registry, intent_identifier, dispatcher, memory, &config);

        match orchestrator.handle("dave", "quiz me please", Some("no_such_agent"), false).await {
            SupervisorReply::Response(response) => {
                assert_eq!(response.metadata.identified_agent.as_deref(), Some("quiz_generator_agent"));
                assert_eq!(response.response, "your quiz is ready");
            }
            SupervisorReply::Clarification(_) => panic!("expected identification to route the request"),
        }
    }

    #[tokio::test]
    async fn livelock_escape_force_routes_after_max_clarification_turns() {
        let oracle_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": json!({
                    "status": "CLARIFICATION_NEEDED",
                    "agent_id": Value::Null,
                    "confidence": 0.2,
                    "reasoning": "too vague",
                    "clarifying_questions": ["which subject?"],
                    "extracted_params": {},
                    "alternative_agents": []
                }).to_string()}}]
            })))
            .mount(&oracle_server)
            .await;

        let worker_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&worker_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "results": {"output": "handled by the generic assistant"}
            })))
            .mount(&worker_server)
            .await;

        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"[{{"id":"generic_llm_wrapper_agent","name":"Generic Assistant","url":"{}","description":"d"}}]"#,
            worker_server.uri()
        )
        .unwrap();
        let registry = Arc::new(Registry::load(f.path().to_str().unwrap()).unwrap());

        let health = Arc::new(HealthProber::new(registry.clone(), 1, 15));
        let debug_store = Arc::new(DebugStore::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), health, debug_store, 5, 10));
        let intent_identifier = Arc::new(IntentIdentifier::new(
            registry.clone(),
            LlmOracleConfig { base_url: Some(oracle_server.uri()), ..Default::default() },
            0.6,
            0.4,
        ));
        let memory = Arc::new(ConversationMemory::new());
        let config = SupervisorConfig::default();
        let orchestrator = Orchestrator::new(registry, intent_identifier, dispatcher, memory, &config);

        for _ in 0..3 {
            orchestrator.handle("carol", "huh", None, true).await;
        }

        match orchestrator.handle("carol", "still unclear", None, true).await {
            SupervisorReply::Response(response) => {
                assert_eq!(response.metadata.identified_agent.as_deref(), Some(GENERIC_LLM_WRAPPER_AGENT_ID));
                assert_eq!(response.response, "handled by the generic assistant");
            }
            SupervisorReply::Clarification(_) => panic!("expected the livelock escape hatch to force a route"),
        }
    }
}
