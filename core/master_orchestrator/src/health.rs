use crate::registry::Registry;
use reqwest::Client;
use serde_json::Value;
use shared_types::AgentStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn probe_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("failed to build health-probe HTTP client")
}

/// Periodically probes every registered agent's `/health` endpoint and
/// keeps the registry's live status up to date. Also offers an on-demand
/// `probe` for the dispatcher to call before a request.
pub struct HealthProber {
    registry: Arc<Registry>,
    client: Client,
    timeout: Duration,
    interval: Duration,
    /// Prevents a new scheduled tick from overlapping an in-flight run.
    running: AtomicBool,
}

impl HealthProber {
    pub fn new(registry: Arc<Registry>, timeout_secs: u64, interval_secs: u64) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        HealthProber {
            registry,
            client: probe_client(timeout),
            timeout,
            interval: Duration::from_secs(interval_secs),
            running: AtomicBool::new(false),
        }
    }

    /// Probe a single agent's `/health` endpoint and update its registry
    /// status. Never returns an error to the caller — probe failures are
    /// folded into an `offline` status, not surfaced.
    pub async fn probe(&self, agent_id: &str) -> AgentStatus {
        let Some(agent) = self.registry.get(agent_id) else {
            return AgentStatus::Unknown;
        };

        let url = format!("{}/health", agent.url.trim_end_matches('/'));
        let status = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) if body.get("status").and_then(Value::as_str) == Some("healthy") => {
                    AgentStatus::Healthy
                }
                Ok(_) => AgentStatus::Offline,
                Err(e) => {
                    debug!(agent_id, error = %e, "health probe body was not valid JSON");
                    AgentStatus::Offline
                }
            },
            Ok(resp) => {
                debug!(agent_id, status = %resp.status(), "health probe returned non-success");
                AgentStatus::Offline
            }
            Err(e) => {
                debug!(agent_id, error = %e, "health probe transport failure");
                AgentStatus::Offline
            }
        };

        self.registry.set_status(&agent.id, status);
        status
    }

    /// Probe every registered agent concurrently. Does not hold any lock
    /// across the network calls: `Registry::list` snapshots descriptors up
    /// front, each probe's result is written back independently.
    pub async fn probe_all(&self) {
        let agents = self.registry.list();
        let futures = agents.iter().map(|a| self.probe(&a.id));
        futures_util::future::join_all(futures).await;
    }

    /// Run `probe_all` on a fixed interval until the process shuts down.
    /// Overlapping ticks are coalesced: if a run is still in flight when
    /// the next tick fires, that tick is skipped rather than queued.
    pub async fn run_forever(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!("health probe tick skipped, previous run still in flight");
                continue;
            }
            self.probe_all().await;
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn registry_with(url: &str) -> Arc<Registry> {
        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"[{{"id":"demo_agent","name":"Demo","url":"{}","description":"d"}}]"#,
            url
        )
        .unwrap();
        Arc::new(Registry::load(f.path().to_str().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn probe_marks_unreachable_agent_offline_without_panicking() {
        let registry = registry_with("http://127.0.0.1:1");
        let prober = HealthProber::new(registry.clone(), 1, 15);
        let status = prober.probe("demo_agent").await;
        assert_eq!(status, AgentStatus::Offline);
        assert_eq!(registry.status_of("demo_agent"), Some(AgentStatus::Offline));
    }

    #[tokio::test]
    async fn probe_unknown_agent_returns_unknown() {
        let registry = registry_with("http://127.0.0.1:1");
        let prober = HealthProber::new(registry, 1, 15);
        let status = prober.probe("no_such_agent").await;
        assert_eq!(status, AgentStatus::Unknown);
    }
}
