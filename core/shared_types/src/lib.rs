//! Wire types shared between the supervisor orchestrator and the worker
//! agents it dispatches to. Everything here is pure data: no I/O, no
//! business logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Canonical identifier for a registered worker agent, e.g. `"quiz_generator_agent"`.
pub type AgentId = String;
/// Opaque identifier for the human on the other end of a conversation.
pub type UserId = String;

/// Live health of a registered agent, tracked by the health prober and
/// updated by the dispatcher on transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Healthy,
    Offline,
    Unknown,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Healthy => write!(f, "healthy"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One row of the registry's static config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfigEntry {
    pub id: AgentId,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub required_params: Vec<String>,
    /// Additional ids/names that should resolve to this agent.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Escape hatch for an agent that doesn't speak the generic
    /// TaskEnvelope/`/process` contract on its default route.
    #[serde(default)]
    pub alternate_endpoint: Option<String>,
}

/// A registered agent plus the mutable state the health prober maintains.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub name: String,
    pub url: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub keywords: Vec<String>,
    pub required_params: Vec<String>,
    pub aliases: Vec<String>,
    pub alternate_endpoint: Option<String>,
    pub status: AgentStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl From<AgentConfigEntry> for AgentDescriptor {
    fn from(e: AgentConfigEntry) -> Self {
        AgentDescriptor {
            id: e.id,
            name: e.name,
            url: e.url,
            description: e.description,
            capabilities: e.capabilities,
            keywords: e.keywords,
            required_params: e.required_params,
            aliases: e.aliases,
            alternate_endpoint: e.alternate_endpoint,
            status: AgentStatus::Unknown,
            last_checked_at: None,
        }
    }
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn in a user's conversation history. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub user_id: UserId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_info: Option<Value>,
}

/// Rollup used by `GET /conversation/summary`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub user_id: UserId,
    pub message_count: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub distinct_agents: Vec<AgentId>,
}

/// A single clarifying question. The oracle may return these as bare
/// strings or as `{field, question}` objects; both normalize to this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClarifyingQuestionRaw {
    Plain(String),
    Structured { question: String, #[serde(default)] field: Option<String> },
}

impl ClarifyingQuestionRaw {
    pub fn into_text(self) -> String {
        match self {
            ClarifyingQuestionRaw::Plain(s) => s,
            ClarifyingQuestionRaw::Structured { question, .. } => question,
        }
    }
}

/// The outcome of intent identification, carried through the clarification
/// gate and merged into the final response's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub agent_id: Option<AgentId>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    pub is_ambiguous: bool,
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
    #[serde(default)]
    pub extracted_params: HashMap<String, Value>,
    #[serde(default)]
    pub alternative_agents: Vec<AgentId>,
}

/// Raw shape returned by the LLM oracle before normalization. `status` is
/// intentionally a string here (not the strict enum) because malformed
/// oracle output must fail to validate rather than fail to parse.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleIntentResponse {
    pub status: String,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub clarifying_questions: Vec<ClarifyingQuestionRaw>,
    #[serde(default)]
    pub extracted_params: HashMap<String, Value>,
    #[serde(default)]
    pub alternative_agents: Vec<AgentId>,
}

pub const ORACLE_STATUS_READY: &str = "READY_TO_ROUTE";
pub const ORACLE_STATUS_CLARIFY: &str = "CLARIFICATION_NEEDED";

/// A single unit of work handed to a worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub parameters: Value,
}

/// Outbound envelope the dispatcher POSTs to `{agent.url}/process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub message_id: Uuid,
    pub sender: String,
    pub recipient: AgentId,
    #[serde(rename = "type")]
    pub kind: String,
    pub task: Task,
    pub timestamp: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(recipient: AgentId, task_name: impl Into<String>, parameters: Value) -> Self {
        TaskEnvelope {
            message_id: Uuid::new_v4(),
            sender: "supervisor".to_string(),
            recipient,
            kind: "task_assignment".to_string(),
            task: Task { name: task_name.into(), parameters },
            timestamp: Utc::now(),
        }
    }
}

/// Outcome a worker reports back. `status` is the only field a dispatcher
/// strictly needs; the rest are best-effort and defaulted when a worker's
/// body is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default = "default_completion_kind", rename = "type")]
    pub kind: String,
    #[serde(default = "Uuid::new_v4")]
    pub related_message_id: Uuid,
    pub status: CompletionStatus,
    #[serde(default = "default_results")]
    pub results: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_completion_kind() -> String {
    "completion_report".to_string()
}

fn default_results() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Closed set of error codes the supervisor surfaces in-band. All worker
/// and infrastructure failures get mapped into one of these; HTTP status
/// stays 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorErrorCode {
    AgentNotFound,
    AgentUnavailable,
    AgentOffline,
    CommunicationError,
    AgentExecutionError,
    ClarificationNeeded,
    UnexpectedError,
}

impl fmt::Display for SupervisorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorErrorCode::AgentNotFound => "AGENT_NOT_FOUND",
            SupervisorErrorCode::AgentUnavailable => "AGENT_UNAVAILABLE",
            SupervisorErrorCode::AgentOffline => "AGENT_OFFLINE",
            SupervisorErrorCode::CommunicationError => "COMMUNICATION_ERROR",
            SupervisorErrorCode::AgentExecutionError => "AGENT_EXECUTION_ERROR",
            SupervisorErrorCode::ClarificationNeeded => "CLARIFICATION_NEEDED",
            SupervisorErrorCode::UnexpectedError => "UNEXPECTED_ERROR",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: SupervisorErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub execution_time_ms: f64,
    #[serde(default)]
    pub agent_trace: Vec<AgentId>,
    #[serde(default)]
    pub participating_agents: Vec<AgentId>,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identified_agent: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub extracted_params: HashMap<String, Value>,
    #[serde(default)]
    pub conversation_length: usize,
}

/// What the supervisor hands back to the caller for a dispatched request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    pub metadata: ResponseMetadata,
}

/// Returned instead of a `RequestResponse` when the clarification gate
/// fires — HTTP 200, distinguishable by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationEnvelope {
    pub status: String,
    pub message: String,
    pub clarifying_questions: Vec<String>,
    pub intent_info: IntentResult,
    pub clarification_count: u32,
    pub max_clarifications: u32,
}

impl ClarificationEnvelope {
    pub fn new(
        message: String,
        clarifying_questions: Vec<String>,
        intent_info: IntentResult,
        clarification_count: u32,
        max_clarifications: u32,
    ) -> Self {
        ClarificationEnvelope {
            status: "clarification_needed".to_string(),
            message,
            clarifying_questions,
            intent_info,
            clarification_count,
            max_clarifications,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Body of `POST /request`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorRequest {
    pub request: String,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default = "default_true")]
    pub auto_route: bool,
    #[serde(default = "default_true")]
    pub include_history: bool,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Either a dispatched response or a clarification request; what
/// `POST /request` always returns one of, at HTTP 200.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SupervisorReply {
    Clarification(ClarificationEnvelope),
    Response(RequestResponse),
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusView {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl From<&AgentDescriptor> for AgentStatusView {
    fn from(d: &AgentDescriptor) -> Self {
        AgentStatusView {
            id: d.id.clone(),
            name: d.name.clone(),
            description: d.description.clone(),
            capabilities: d.capabilities.clone(),
            status: d.status,
            last_checked_at: d.last_checked_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_envelope_round_trips() {
        let env = TaskEnvelope::new(
            "quiz_generator_agent".to_string(),
            "process_request",
            serde_json::json!({"topic": "loops"}),
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: TaskEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.recipient, "quiz_generator_agent");
        assert_eq!(back.kind, "task_assignment");
        assert_eq!(back.sender, "supervisor");
    }

    #[test]
    fn completion_report_defaults_fill_in_missing_fields() {
        let raw = serde_json::json!({"status": "SUCCESS"});
        let report: CompletionReport = serde_json::from_value(raw).unwrap();
        assert_eq!(report.status, CompletionStatus::Success);
        assert_eq!(report.kind, "completion_report");
        assert_eq!(report.results, Value::Object(serde_json::Map::new()));
    }

    #[test]
    fn clarifying_question_normalizes_structured_and_plain() {
        let plain: ClarifyingQuestionRaw = serde_json::from_value(serde_json::json!("what topic?")).unwrap();
        assert_eq!(plain.into_text(), "what topic?");

        let structured: ClarifyingQuestionRaw = serde_json::from_value(
            serde_json::json!({"field": "topic", "question": "which topic do you mean?"}),
        )
        .unwrap();
        assert_eq!(structured.into_text(), "which topic do you mean?");
    }

    #[test]
    fn supervisor_error_code_serializes_screaming_snake_case() {
        let err = ResponseError {
            code: SupervisorErrorCode::AgentUnavailable,
            message: "offline".to_string(),
            details: None,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "AGENT_UNAVAILABLE");
    }

    #[test]
    fn oracle_intent_response_accepts_mixed_clarifying_questions() {
        let raw = serde_json::json!({
            "status": "CLARIFICATION_NEEDED",
            "confidence": 0.3,
            "clarifying_questions": ["plain one", {"field": "topic", "question": "structured one"}]
        });
        let parsed: OracleIntentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.clarifying_questions.len(), 2);
        assert_eq!(parsed.status, ORACLE_STATUS_CLARIFY);
    }
}
