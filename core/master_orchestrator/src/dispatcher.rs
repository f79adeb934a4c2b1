//! Forwards a shaped payload to a worker agent over HTTP and normalizes
//! whatever comes back — success, worker failure, unparseable body, or
//! outright unreachable — into a `RequestResponse`.

use crate::debug_store::DebugStore;
use crate::health::HealthProber;
use crate::registry::Registry;
use chrono::Utc;
use jsonschema::{Draft, JSONSchema};
use reqwest::Client;
use serde_json::{json, Map, Value};
use shared_types::{
    AgentDescriptor, AgentStatus, CompletionReport, CompletionStatus, ResponseError,
    ResponseMetadata, RequestResponse, SupervisorErrorCode, TaskEnvelope,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

fn completion_report_schema() -> JSONSchema {
    let schema = json!({
        "type": "object",
        "required": ["status"],
        "properties": {
            "status": {"type": "string", "enum": ["SUCCESS", "FAILURE"]},
            "results": {}
        }
    });
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("invalid completion report schema")
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    health: Arc<HealthProber>,
    debug_store: Arc<DebugStore>,
    client: Client,
    retry_backoff: Duration,
    completion_schema: JSONSchema,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, health: Arc<HealthProber>, debug_store: Arc<DebugStore>, worker_timeout_secs: u64, retry_backoff_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(worker_timeout_secs))
            .build()
            .expect("failed to build dispatcher HTTP client");
        Dispatcher {
            registry,
            health,
            debug_store,
            client,
            retry_backoff: Duration::from_millis(retry_backoff_ms),
            completion_schema: completion_report_schema(),
        }
    }

    pub async fn forward(&self, agent_id: &str, raw_request: &str, shaped_payload: Value) -> RequestResponse {
        let Some(agent) = self.registry.get(agent_id) else {
            return chat_error(agent_id, SupervisorErrorCode::AgentNotFound, format!("unknown agent: {agent_id}"));
        };

        if agent.status != AgentStatus::Healthy {
            let live = self.health.probe(&agent.id).await;
            if live != AgentStatus::Healthy {
                return chat_error(&agent.id, SupervisorErrorCode::AgentUnavailable, format!("{} is currently unavailable", agent.name));
            }
        }

        let parameters = build_task_parameters(raw_request, &shaped_payload);
        let envelope = TaskEnvelope::new(agent.id.clone(), "process_request", parameters);
        let endpoint = agent
            .alternate_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/process", agent.url.trim_end_matches('/')));

        let response = match self.send_with_retry(&endpoint, &envelope).await {
            Some(resp) => resp,
            None => {
                self.registry.set_status(&agent.id, AgentStatus::Offline);
                return chat_error(&agent.id, SupervisorErrorCode::CommunicationError, format!("{} could not be reached", agent.name));
            }
        };

        let http_status = response.status().as_u16();
        let raw_text = response.text().await.unwrap_or_default();

        let report = match serde_json::from_str::<Value>(&raw_text) {
            Ok(value) => self.report_from_json(&agent, &envelope, value, http_status, &raw_text),
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "process response was not valid JSON");
                self.debug_store.record_raw_text(&agent.id, raw_text.clone(), Some(http_status), "unparseable process response");
                synthesize_report(&envelope, http_status, json!({"output": raw_text}))
            }
        };

        self.response_from_report(&agent, report)
    }

    fn report_from_json(&self, agent: &AgentDescriptor, envelope: &TaskEnvelope, value: Value, http_status: u16, raw_text: &str) -> CompletionReport {
        if let Err(errors) = self.completion_schema.validate(&value) {
            let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
            warn!(agent_id = %agent.id, errors = ?reasons, "completion report failed schema validation");
            self.debug_store.record_raw_json(&agent.id, value.clone(), Some(http_status), "completion report schema validation failed");
            return synthesize_report(envelope, http_status, json!({"output": raw_text}));
        }

        match serde_json::from_value::<CompletionReport>(value.clone()) {
            Ok(report) => {
                if report.related_message_id != envelope.message_id {
                    warn!(agent_id = %agent.id, "completion report related_message_id does not match the dispatched task");
                }
                report
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "completion report did not match the expected shape");
                self.debug_store.record_raw_json(&agent.id, value, Some(http_status), "completion report deserialize failed");
                synthesize_report(envelope, http_status, json!({"output": raw_text}))
            }
        }
    }

    fn response_from_report(&self, agent: &AgentDescriptor, report: CompletionReport) -> RequestResponse {
        match report.status {
            CompletionStatus::Success => {
                if report.results.get("clarification_needed").and_then(Value::as_bool) == Some(true) {
                    clarification_from_results(agent, &report.results)
                } else {
                    success_response(agent, &report.results)
                }
            }
            CompletionStatus::Failure => failure_response(agent, &report.results),
        }
    }

    /// Posts once, and on any transport error or non-success status waits
    /// the configured backoff and tries exactly once more. A worker that
    /// responds at all (even with a non-2xx) past two attempts is treated
    /// as unreachable, not as a worker-reported failure.
    async fn send_with_retry(&self, endpoint: &str, envelope: &TaskEnvelope) -> Option<reqwest::Response> {
        for attempt in 0..2u8 {
            if attempt > 0 {
                tokio::time::sleep(self.retry_backoff).await;
            }
            match self.client.post(endpoint).json(envelope).send().await {
                Ok(resp) if resp.status().is_success() => return Some(resp),
                Ok(resp) => warn!(endpoint, status = %resp.status(), attempt, "dispatch attempt returned a non-success status"),
                Err(e) => warn!(endpoint, error = %e, attempt, "dispatch attempt failed"),
            }
        }
        None
    }
}

fn build_task_parameters(raw_request: &str, shaped_payload: &Value) -> Value {
    match shaped_payload {
        Value::Object(map) if map.contains_key("agent_name") && map.contains_key("intent") && map.contains_key("payload") => {
            shaped_payload.clone()
        }
        Value::Object(map) => {
            let mut merged: Map<String, Value> = map.clone();
            merged.entry("request".to_string()).or_insert_with(|| json!(raw_request));
            Value::Object(merged)
        }
        other => json!({"request": raw_request, "payload": other}),
    }
}

fn synthesize_report(envelope: &TaskEnvelope, http_status: u16, results: Value) -> CompletionReport {
    CompletionReport {
        message_id: uuid::Uuid::new_v4(),
        sender: envelope.recipient.clone(),
        recipient: "supervisor".to_string(),
        kind: "completion_report".to_string(),
        related_message_id: envelope.message_id,
        status: if http_status == 200 { CompletionStatus::Success } else { CompletionStatus::Failure },
        results,
        timestamp: Utc::now(),
    }
}

fn extract_output_text(results: &Value) -> String {
    for key in ["output", "summary"] {
        match results.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(other) if !other.is_null() => return serde_json::to_string_pretty(other).unwrap_or_default(),
            _ => {}
        }
    }
    String::new()
}

fn render_papers(papers: &[Value]) -> String {
    let mut rendered = String::from("\n\nRelevant papers:\n");
    for paper in papers {
        let title = paper.get("title").and_then(Value::as_str).unwrap_or("untitled");
        let authors = paper.get("authors").and_then(Value::as_str).unwrap_or("unknown authors");
        let year = paper.get("year").map(|v| v.to_string()).unwrap_or_default();
        let source = paper.get("source").and_then(Value::as_str).unwrap_or("unknown source");
        let link = paper.get("link").and_then(Value::as_str).unwrap_or("");
        rendered.push_str(&format!("- {title} — {authors} ({year}) [{source}] — {link}\n"));
        if let Some(points) = paper.get("key_points").and_then(Value::as_array) {
            for point in points {
                if let Some(text) = point.as_str() {
                    rendered.push_str(&format!("  - {text}\n"));
                }
            }
        }
    }
    rendered
}

fn success_response(agent: &AgentDescriptor, results: &Value) -> RequestResponse {
    let mut text = extract_output_text(results);
    if let Some(papers) = results.get("papers").and_then(Value::as_array) {
        text.push_str(&render_papers(papers));
    }

    RequestResponse {
        response: text,
        structured_output: Some(results.clone()),
        agent_id: Some(agent.id.clone()),
        timestamp: Utc::now(),
        error: None,
        metadata: ResponseMetadata::default(),
    }
}

fn clarification_from_results(agent: &AgentDescriptor, results: &Value) -> RequestResponse {
    let clarifying_questions: Vec<String> = results
        .get("clarifying_questions")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let details = json!({
        "clarifying_questions": clarifying_questions,
        "example": results.get("example"),
        "required_format": results.get("required_format"),
    });

    RequestResponse {
        response: "the agent needs more information to continue".to_string(),
        structured_output: None,
        agent_id: Some(agent.id.clone()),
        timestamp: Utc::now(),
        error: Some(ResponseError {
            code: SupervisorErrorCode::ClarificationNeeded,
            message: "clarification needed".to_string(),
            details: Some(details),
        }),
        metadata: ResponseMetadata::default(),
    }
}

fn failure_response(agent: &AgentDescriptor, results: &Value) -> RequestResponse {
    let message = results
        .get("error")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("{} reported a failure", agent.name));

    RequestResponse {
        response: message.clone(),
        structured_output: None,
        agent_id: Some(agent.id.clone()),
        timestamp: Utc::now(),
        error: Some(ResponseError {
            code: SupervisorErrorCode::AgentExecutionError,
            message,
            details: Some(results.clone()),
        }),
        metadata: ResponseMetadata::default(),
    }
}

fn chat_error(agent_id: &str, code: SupervisorErrorCode, message: String) -> RequestResponse {
    RequestResponse {
        response: message.clone(),
        structured_output: None,
        agent_id: Some(agent_id.to_string()),
        timestamp: Utc::now(),
        error: Some(ResponseError { code, message, details: None }),
        metadata: ResponseMetadata::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry_with(url: &str) -> Arc<Registry> {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"[{{"id":"quiz_generator_agent","name":"Quiz Generator","url":"{url}","description":"d"}}]"#).unwrap();
        Arc::new(Registry::load(f.path().to_str().unwrap()).unwrap())
    }

    fn dispatcher_for(registry: Arc<Registry>) -> Dispatcher {
        let health = Arc::new(HealthProber::new(registry.clone(), 1, 15));
        let debug_store = Arc::new(DebugStore::new());
        Dispatcher::new(registry, health, debug_store, 5, 10)
    }

    #[tokio::test]
    async fn unknown_agent_returns_agent_not_found_without_a_network_call() {
        let registry = registry_with("http://127.0.0.1:1");
        let dispatcher = dispatcher_for(registry);
        let response = dispatcher.forward("no_such_agent", "hi", json!({})).await;
        assert_eq!(response.error.unwrap().code, SupervisorErrorCode::AgentNotFound);
    }

    #[tokio::test]
    async fn offline_agent_returns_agent_unavailable() {
        let registry = registry_with("http://127.0.0.1:1");
        let dispatcher = dispatcher_for(registry);
        let response = dispatcher.forward("quiz_generator_agent", "hi", json!({"request": "hi"})).await;
        assert_eq!(response.error.unwrap().code, SupervisorErrorCode::AgentUnavailable);
    }

    #[tokio::test]
    async fn successful_dispatch_extracts_output_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "related_message_id": "00000000-0000-0000-0000-000000000000",
                "results": {"output": "here is your quiz"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&server)
            .await;

        let registry = registry_with(&server.uri());
        let dispatcher = dispatcher_for(registry);
        let response = dispatcher.forward("quiz_generator_agent", "quiz me", json!({"request": "quiz me"})).await;

        assert!(response.error.is_none());
        assert_eq!(response.response, "here is your quiz");
    }

    #[tokio::test]
    async fn worker_failure_status_is_not_retried_and_surfaces_agent_execution_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "FAILURE",
                "related_message_id": "00000000-0000-0000-0000-000000000000",
                "results": {"error": "could not generate quiz"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&server)
            .await;

        let registry = registry_with(&server.uri());
        let dispatcher = dispatcher_for(registry);
        let response = dispatcher.forward("quiz_generator_agent", "quiz me", json!({"request": "quiz me"})).await;

        let error = response.error.unwrap();
        assert_eq!(error.code, SupervisorErrorCode::AgentExecutionError);
        assert_eq!(error.message, "could not generate quiz");
    }

    #[tokio::test]
    async fn clarification_needed_result_maps_to_clarification_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "related_message_id": "00000000-0000-0000-0000-000000000000",
                "results": {
                    "clarification_needed": true,
                    "clarifying_questions": ["which subject?"],
                    "example": "biology"
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&server)
            .await;

        let registry = registry_with(&server.uri());
        let dispatcher = dispatcher_for(registry);
        let response = dispatcher.forward("quiz_generator_agent", "help me", json!({"request": "help me"})).await;

        let error = response.error.unwrap();
        assert_eq!(error.code, SupervisorErrorCode::ClarificationNeeded);
        assert_eq!(error.details.unwrap()["clarifying_questions"], json!(["which subject?"]));
    }

    #[tokio::test]
    async fn unparseable_body_is_captured_and_synthesized_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(500).set_body_string("not json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&server)
            .await;

        let registry = registry_with(&server.uri());
        let dispatcher = dispatcher_for(registry);
        let response = dispatcher.forward("quiz_generator_agent", "hi", json!({"request": "hi"})).await;

        assert_eq!(response.error.unwrap().code, SupervisorErrorCode::AgentExecutionError);
    }

    #[test]
    fn build_task_parameters_passes_native_triple_through_unmodified() {
        let shaped = json!({"agent_name": "quiz_generator_agent", "intent": "generate_quiz", "payload": {}});
        let built = build_task_parameters("quiz me", &shaped);
        assert_eq!(built, shaped);
    }

    #[test]
    fn build_task_parameters_merges_raw_request_into_flat_shapes() {
        let shaped = json!({"data": {"topic": "ai"}});
        let built = build_task_parameters("find papers on ai", &shaped);
        assert_eq!(built["request"], "find papers on ai");
        assert_eq!(built["data"]["topic"], "ai");
    }
}
