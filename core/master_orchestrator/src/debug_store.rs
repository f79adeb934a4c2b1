use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use shared_types::AgentId;

/// What we stash after a dispatch, good or bad, for post-mortem via
/// `GET /debug/last-agent-response`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RawAgentResponse {
    pub raw_text: Option<String>,
    pub raw_json: Option<Value>,
    pub http_status: Option<u16>,
    pub context: String,
    pub captured_at: DateTime<Utc>,
}

/// Bounded, last-write-wins store of the most recent raw response per
/// agent. Never grows past one entry per registered agent.
pub struct DebugStore {
    entries: DashMap<AgentId, RawAgentResponse>,
}

impl DebugStore {
    pub fn new() -> Self {
        DebugStore { entries: DashMap::new() }
    }

    pub fn record_raw_text(&self, agent_id: &str, raw_text: String, http_status: Option<u16>, context: &str) {
        self.entries.insert(
            agent_id.to_string(),
            RawAgentResponse {
                raw_text: Some(redact_secrets_in_text(&raw_text)),
                raw_json: None,
                http_status,
                context: context.to_string(),
                captured_at: Utc::now(),
            },
        );
    }

    pub fn record_raw_json(&self, agent_id: &str, raw_json: Value, http_status: Option<u16>, context: &str) {
        self.entries.insert(
            agent_id.to_string(),
            RawAgentResponse {
                raw_text: None,
                raw_json: Some(redact_secrets(raw_json)),
                http_status,
                context: context.to_string(),
                captured_at: Utc::now(),
            },
        );
    }

    pub fn last(&self, agent_id: &str) -> Option<RawAgentResponse> {
        self.entries.get(agent_id).map(|e| e.clone())
    }
}

impl Default for DebugStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively strips obviously sensitive keys from a JSON value before it
/// is persisted to the debug store or conversation memory. Worker
/// responses are not trusted to withhold secrets they were configured
/// with.
pub fn redact_secrets(value: Value) -> Value {
    const SENSITIVE_KEYS: [&str; 4] = ["api_key", "token", "authorization", "secret"];

    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (k, v) in map {
                if SENSITIVE_KEYS.iter().any(|s| k.to_lowercase().contains(s)) {
                    redacted.insert(k, Value::String("[redacted]".to_string()));
                } else {
                    redacted.insert(k, redact_secrets(v));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(redact_secrets).collect()),
        other => other,
    }
}

fn redact_secrets_in_text(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => serde_json::to_string(&redact_secrets(value)).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}
