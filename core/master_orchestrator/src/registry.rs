use chrono::Utc;
use dashmap::DashMap;
use shared_types::{AgentConfigEntry, AgentDescriptor, AgentId, AgentStatus};
use std::fs;
use tracing::{info, warn};

/// Static registry of worker agents. Descriptors are created at startup from
/// the config file and destroyed at shutdown; the only mutation afterwards
/// is `set_status`, called by the health prober and the dispatcher.
pub struct Registry {
    agents: DashMap<AgentId, AgentDescriptor>,
    /// alias/name -> canonical id, built once at load time.
    aliases: DashMap<String, AgentId>,
}

impl Registry {
    /// Load the agent list from a JSON config file. Idempotent: calling
    /// this again replaces the previous set and resets every status to
    /// `unknown`.
    pub fn load(path: &str) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read registry file {path}: {e}"))?;
        let entries: Vec<AgentConfigEntry> = serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse registry file {path}: {e}"))?;

        let agents = DashMap::new();
        let aliases = DashMap::new();
        for entry in entries {
            let id = entry.id.clone();
            for alias in entry.aliases.iter().cloned().chain(std::iter::once(entry.name.clone())) {
                aliases.insert(normalize_key(&alias), id.clone());
            }
            aliases.insert(normalize_key(&id), id.clone());
            agents.insert(id.clone(), AgentDescriptor::from(entry));
        }

        info!(agent_count = agents.len(), "registry loaded");
        Ok(Registry { agents, aliases })
    }

    /// Resolve an id/alias/name to the canonical agent descriptor.
    pub fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        let canonical = self.resolve_alias(agent_id)?;
        self.agents.get(&canonical).map(|d| d.clone())
    }

    /// Resolve an id/alias/name to its canonical registry id, if known.
    pub fn resolve_alias(&self, agent_id: &str) -> Option<AgentId> {
        let key = normalize_key(agent_id);
        self.aliases.get(&key).map(|canonical| canonical.clone())
    }

    pub fn list(&self) -> Vec<AgentDescriptor> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.resolve_alias(agent_id).is_some()
    }

    /// Update an agent's live status. Called only by the health prober and
    /// by the dispatcher on a second consecutive transport failure.
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) {
        let Some(canonical) = self.resolve_alias(agent_id) else {
            warn!(agent_id, "set_status called for unknown agent");
            return;
        };
        if let Some(mut descriptor) = self.agents.get_mut(&canonical) {
            descriptor.status = status;
            descriptor.last_checked_at = Some(Utc::now());
        }
    }

    pub fn status_of(&self, agent_id: &str) -> Option<AgentStatus> {
        self.get(agent_id).map(|d| d.status)
    }
}

fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase().replace([' ', '-'], "_")
}
