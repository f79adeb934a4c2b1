use actix_web::web;
use std::sync::Arc;

use crate::config::SupervisorConfig;
use crate::debug_store::DebugStore;
use crate::health::HealthProber;
use crate::intent::IntentIdentifier;
use crate::memory::ConversationMemory;
use crate::orchestrator::Orchestrator;
use crate::registry::Registry;

pub mod audit_middleware;
pub mod auth;
pub mod auth_middleware;
pub mod http;
pub mod rate_limit;
pub mod validation;

use auth::JwtAuth;
use rate_limit::RateLimitConfig;

/// Everything an HTTP handler needs, cloned cheaply into each worker thread.
#[derive(Clone)]
pub struct ApiContext {
    pub registry: Arc<Registry>,
    pub health: Arc<HealthProber>,
    pub memory: Arc<ConversationMemory>,
    pub debug_store: Arc<DebugStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub intent_identifier: Arc<IntentIdentifier>,
    pub config: Arc<SupervisorConfig>,
    pub jwt_auth: Option<Arc<JwtAuth>>,
    pub rate_limit_config: RateLimitConfig,
    pub app_env: String,
}

pub fn configure_http(cfg: &mut web::ServiceConfig, ctx: ApiContext) {
    http::configure(cfg, ctx);
}
