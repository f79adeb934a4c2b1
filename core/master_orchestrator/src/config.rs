use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;

fn default_registry_path() -> String {
    "data/agents.json".to_string()
}
fn default_route_threshold() -> f64 {
    0.60
}
fn default_clarify_threshold() -> f64 {
    0.40
}
fn default_max_clarifications() -> u32 {
    3
}
fn default_probe_interval() -> u64 {
    15
}
fn default_probe_timeout() -> u64 {
    2
}
fn default_worker_timeout() -> u64 {
    60
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_history_limit() -> usize {
    10
}
fn default_oracle_timeout() -> u64 {
    30
}

/// Settings for the LLM oracle the Intent Identifier calls. The oracle
/// itself is out of scope; this is just enough to reach it over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmOracleConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmOracleConfig {
    fn default() -> Self {
        LlmOracleConfig {
            provider: String::new(),
            api_key: None,
            base_url: None,
            model: None,
            timeout_secs: default_oracle_timeout(),
        }
    }
}

/// Full supervisor configuration: registry location, clarification-gate
/// thresholds, probe/worker timeouts, and the LLM oracle to call.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub llm: LlmOracleConfig,
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
    #[serde(default = "default_route_threshold")]
    pub route_confidence_threshold: f64,
    #[serde(default = "default_clarify_threshold")]
    pub clarify_confidence_threshold: f64,
    #[serde(default = "default_max_clarifications")]
    pub max_clarification_attempts: u32,
    #[serde(default = "default_probe_interval")]
    pub health_probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub health_probe_timeout_secs: u64,
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,
    #[serde(default = "default_retry_backoff")]
    pub worker_retry_backoff_ms: u64,
    #[serde(default = "default_history_limit")]
    pub conversation_history_limit: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            llm: LlmOracleConfig::default(),
            registry_path: default_registry_path(),
            route_confidence_threshold: default_route_threshold(),
            clarify_confidence_threshold: default_clarify_threshold(),
            max_clarification_attempts: default_max_clarifications(),
            health_probe_interval_secs: default_probe_interval(),
            health_probe_timeout_secs: default_probe_timeout(),
            worker_timeout_secs: default_worker_timeout(),
            worker_retry_backoff_ms: default_retry_backoff(),
            conversation_history_limit: default_history_limit(),
        }
    }
}

/// Load a single TOML config file and perform simple environment
/// interpolation for occurrences of `{{VAR}}` or `${VAR}`.
pub fn load_single_config(path: &str) -> Result<SupervisorConfig, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

    let re = Regex::new(r"(\{\{|\$\{)([a-zA-Z0-9_]+)(\}\}|\})")
        .map_err(|e| format!("Failed to create regex: {}", e))?;

    let processed_content = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps[2];
        env::var(var_name).unwrap_or_else(|_| format!("{{{{{{{}}}}}}}", var_name))
    });

    let config: SupervisorConfig = toml::from_str(&processed_content)
        .map_err(|e| format!("Failed to parse config file: {}", e))?;
    Ok(config)
}

/// Merge two configs, treating `overlay` as an environment-specific override
/// on top of `base`. A zero/empty overlay value means "unset"; base wins.
pub fn merge_supervisor_config(base: SupervisorConfig, overlay: SupervisorConfig) -> SupervisorConfig {
    let default = SupervisorConfig::default();

    SupervisorConfig {
        llm: LlmOracleConfig {
            provider: if overlay.llm.provider.is_empty() { base.llm.provider } else { overlay.llm.provider },
            api_key: overlay.llm.api_key.or(base.llm.api_key),
            base_url: overlay.llm.base_url.or(base.llm.base_url),
            model: overlay.llm.model.or(base.llm.model),
            timeout_secs: if overlay.llm.timeout_secs != default_oracle_timeout() { overlay.llm.timeout_secs } else { base.llm.timeout_secs },
        },
        registry_path: if overlay.registry_path != default.registry_path { overlay.registry_path } else { base.registry_path },
        route_confidence_threshold: if (overlay.route_confidence_threshold - default.route_confidence_threshold).abs() > f64::EPSILON {
            overlay.route_confidence_threshold
        } else {
            base.route_confidence_threshold
        },
        clarify_confidence_threshold: if (overlay.clarify_confidence_threshold - default.clarify_confidence_threshold).abs() > f64::EPSILON {
            overlay.clarify_confidence_threshold
        } else {
            base.clarify_confidence_threshold
        },
        max_clarification_attempts: if overlay.max_clarification_attempts != default.max_clarification_attempts {
            overlay.max_clarification_attempts
        } else {
            base.max_clarification_attempts
        },
        health_probe_interval_secs: if overlay.health_probe_interval_secs != default.health_probe_interval_secs {
            overlay.health_probe_interval_secs
        } else {
            base.health_probe_interval_secs
        },
        health_probe_timeout_secs: if overlay.health_probe_timeout_secs != default.health_probe_timeout_secs {
            overlay.health_probe_timeout_secs
        } else {
            base.health_probe_timeout_secs
        },
        worker_timeout_secs: if overlay.worker_timeout_secs != default.worker_timeout_secs {
            overlay.worker_timeout_secs
        } else {
            base.worker_timeout_secs
        },
        worker_retry_backoff_ms: if overlay.worker_retry_backoff_ms != default.worker_retry_backoff_ms {
            overlay.worker_retry_backoff_ms
        } else {
            base.worker_retry_backoff_ms
        },
        conversation_history_limit: if overlay.conversation_history_limit != default.conversation_history_limit {
            overlay.conversation_history_limit
        } else {
            base.conversation_history_limit
        },
    }
}

/// Load configuration using an environment profile, overlaying
/// `data/config.<env>.toml` on top of the base `data/config.toml`.
pub fn load_app_config_with_env(base_path: &str, env_name: &str) -> Result<SupervisorConfig, String> {
    let base = load_single_config(base_path)?;

    let env = env_name.to_lowercase();
    let overlay_path = format!("data/config.{}.toml", env);

    let overlay = match load_single_config(&overlay_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if e.contains("Failed to read config file") {
                return Ok(base);
            }
            return Err(e);
        }
    };

    Ok(merge_supervisor_config(base, overlay))
}
