use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use shared_types::{AgentId, ConversationMessage, ConversationSummary, MessageRole, UserId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Caps how many turns a single user's partition keeps in memory before
/// the oldest are evicted. Retrieval is always bounded separately by the
/// caller-supplied `limit`; this is just the backing store's ceiling.
const MAX_MESSAGES_PER_USER: usize = 500;

/// Append-only conversation log, partitioned by user so that one user's
/// writes never block another's. Each partition carries its own lock so a
/// single user's appends are serialized without serializing the whole
/// store.
pub struct ConversationMemory {
    partitions: DashMap<UserId, Arc<Mutex<VecDeque<ConversationMessage>>>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        ConversationMemory {
            partitions: DashMap::new(),
        }
    }

    fn partition(&self, user_id: &str) -> Arc<Mutex<VecDeque<ConversationMessage>>> {
        self.partitions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Append one turn. Immediately visible to `history`/`summary` once
    /// this returns.
    pub async fn append(
        &self,
        user_id: &str,
        role: MessageRole,
        content: String,
        agent_id: Option<AgentId>,
        intent_info: Option<Value>,
    ) {
        let message = ConversationMessage {
            user_id: user_id.to_string(),
            role,
            content,
            timestamp: Utc::now(),
            agent_id,
            intent_info,
        };

        let partition = self.partition(user_id);
        let mut log = partition.lock().await;
        log.push_back(message);
        while log.len() > MAX_MESSAGES_PER_USER {
            log.pop_front();
        }
    }

    /// The most recent `limit` turns, in chronological order.
    pub async fn history(&self, user_id: &str, limit: usize) -> Vec<ConversationMessage> {
        let partition = self.partition(user_id);
        let log = partition.lock().await;
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }

    pub async fn summary(&self, user_id: &str) -> ConversationSummary {
        let partition = self.partition(user_id);
        let log = partition.lock().await;

        let mut distinct_agents: Vec<AgentId> = Vec::new();
        for m in log.iter() {
            if let Some(a) = &m.agent_id {
                if !distinct_agents.contains(a) {
                    distinct_agents.push(a.clone());
                }
            }
        }

        ConversationSummary {
            user_id: user_id.to_string(),
            message_count: log.len(),
            first_timestamp: log.front().map(|m| m.timestamp),
            last_timestamp: log.back().map(|m| m.timestamp),
            distinct_agents,
        }
    }

    pub async fn clear(&self, user_id: &str) {
        let partition = self.partition(user_id);
        let mut log = partition.lock().await;
        log.clear();
    }

    /// Count of the trailing consecutive assistant turns that carried a
    /// clarification (no `agent_id`, i.e. nothing was dispatched). Used by
    /// the orchestrator's livelock escape hatch.
    pub async fn trailing_clarification_count(&self, user_id: &str) -> u32 {
        let partition = self.partition(user_id);
        let log = partition.lock().await;
        let mut count = 0u32;
        for message in log.iter().rev() {
            if message.role != MessageRole::Assistant {
                continue;
            }
            if message.agent_id.is_none() {
                count += 1;
            } else {
                break;
            }
        }
        count
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_is_immediately_visible_to_history() {
        let mem = ConversationMemory::new();
        mem.append("alice", MessageRole::User, "hi".to_string(), None, None).await;
        let history = mem.history("alice", 10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn history_returns_most_recent_n_in_order() {
        let mem = ConversationMemory::new();
        for i in 0..15 {
            mem.append("bob", MessageRole::User, format!("msg-{i}"), None, None).await;
        }
        let history = mem.history("bob", 10).await;
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].content, "msg-5");
        assert_eq!(history[9].content, "msg-14");
    }

    #[tokio::test]
    async fn different_users_are_independent() {
        let mem = ConversationMemory::new();
        mem.append("alice", MessageRole::User, "a1".to_string(), None, None).await;
        mem.append("bob", MessageRole::User, "b1".to_string(), None, None).await;
        assert_eq!(mem.history("alice", 10).await.len(), 1);
        assert_eq!(mem.history("bob", 10).await.len(), 1);
    }

    #[tokio::test]
    async fn summary_reports_distinct_agents_and_bounds() {
        let mem = ConversationMemory::new();
        mem.append("carol", MessageRole::User, "q".to_string(), None, None).await;
        mem.append(
            "carol",
            MessageRole::Assistant,
            "a".to_string(),
            Some("quiz_generator_agent".to_string()),
            None,
        )
        .await;
        let summary = mem.summary("carol").await;
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.distinct_agents, vec!["quiz_generator_agent".to_string()]);
    }

    #[tokio::test]
    async fn clear_empties_the_partition() {
        let mem = ConversationMemory::new();
        mem.append("dave", MessageRole::User, "x".to_string(), None, None).await;
        mem.clear("dave").await;
        assert_eq!(mem.history("dave", 10).await.len(), 0);
    }

    #[tokio::test]
    async fn trailing_clarification_count_stops_at_a_dispatched_turn() {
        let mem = ConversationMemory::new();
        mem.append("erin", MessageRole::User, "q1".to_string(), None, None).await;
        mem.append("erin", MessageRole::Assistant, "clarify1".to_string(), None, None).await;
        mem.append("erin", MessageRole::User, "q2".to_string(), None, None).await;
        mem.append("erin", MessageRole::Assistant, "clarify2".to_string(), None, None).await;
        assert_eq!(mem.trailing_clarification_count("erin").await, 2);

        mem.append(
            "erin",
            MessageRole::Assistant,
            "dispatched".to_string(),
            Some("quiz_generator_agent".to_string()),
            None,
        )
        .await;
        assert_eq!(mem.trailing_clarification_count("erin").await, 0);
    }
}
