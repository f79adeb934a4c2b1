use actix_cors::Cors;
use actix_web::{http::header, middleware::DefaultHeaders, web, App, HttpServer};
use std::env;
use std::sync::Arc;

use master_orchestrator::api::{self, rate_limit::RateLimitConfig, ApiContext};
use master_orchestrator::config;
use master_orchestrator::debug_store::DebugStore;
use master_orchestrator::dispatcher::Dispatcher;
use master_orchestrator::health::HealthProber;
use master_orchestrator::intent::IntentIdentifier;
use master_orchestrator::memory::ConversationMemory;
use master_orchestrator::orchestrator::Orchestrator;
use master_orchestrator::registry::Registry;

/// Build the Actix HTTP server for the orchestrator. Does not start it; the
/// caller awaits the returned `Server` and coordinates shutdown.
fn run_http_server(api_ctx: ApiContext, bind_addr: &str) -> std::io::Result<actix_web::dev::Server> {
    let ctx = api_ctx.clone();

    let server = HttpServer::new(move || {
        let cors = if ctx.app_env == "prod" {
            Cors::default()
                .allowed_origin("https://orchestrator.example.com")
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
                .supports_credentials()
                .max_age(3600)
        } else {
            Cors::default()
                .allowed_origin("http://localhost:8282")
                .allowed_origin("http://127.0.0.1:8282")
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
                .supports_credentials()
                .max_age(3600)
        };

        let security_headers = DefaultHeaders::new()
            .add(("X-Frame-Options", "DENY"))
            .add(("X-Content-Type-Options", "nosniff"))
            .add(("Referrer-Policy", "no-referrer"))
            .add(("Content-Security-Policy", "default-src 'none'; frame-ancestors 'none';"));

        let api_ctx_clone = ctx.clone();

        App::new()
            .app_data(
                web::JsonConfig::default()
                    .limit(10 * 1024 * 1024)
                    .error_handler(|err, _req| {
                        let error_msg = format!("JSON payload error: {}", err);
                        tracing::warn!("{}", error_msg);
                        actix_web::error::InternalError::from_response(
                            err,
                            actix_web::HttpResponse::BadRequest().json(serde_json::json!({
                                "error": "Invalid JSON payload",
                                "details": error_msg,
                            })),
                        )
                        .into()
                    }),
            )
            .configure(|cfg| api::configure_http(cfg, api_ctx_clone.clone()))
            .wrap(api::audit_middleware::SecurityAuditMiddleware::new())
            .wrap(api::rate_limit::RateLimitMiddleware::new(api_ctx_clone.rate_limit_config.clone()))
            .wrap(api::auth_middleware::ClaimsExtractionMiddleware::new(api_ctx_clone.jwt_auth.clone()))
            .wrap(api::validation::RequestValidationMiddleware::new())
            .wrap(security_headers)
            .wrap(cors)
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    platform::init_tracing("master_orchestrator").expect("failed to init tracing");

    let metrics_addr = env::var("METRICS_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());
    match metrics_addr.parse() {
        Ok(addr) => {
            if let Err(e) = platform::init_metrics(addr) {
                tracing::warn!("failed to initialize metrics exporter on {}: {}", metrics_addr, e);
            } else {
                tracing::info!("metrics exporter listening on {}", metrics_addr);
            }
        }
        Err(e) => {
            tracing::warn!("invalid METRICS_ADDR '{}': {} (metrics exporter disabled)", metrics_addr, e);
        }
    }

    let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    let config_path = env::var("SUPERVISOR_CONFIG_PATH").unwrap_or_else(|_| "data/config.toml".to_string());

    let app_config = match config::load_app_config_with_env(&config_path, &app_env) {
        Ok(cfg) => {
            tracing::info!(env = %app_env, "configuration loaded");
            Arc::new(cfg)
        }
        Err(e) => {
            tracing::error!("failed to load configuration: {}", e);
            return Ok(());
        }
    };

    let registry = match Registry::load(&app_config.registry_path) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!("failed to load agent registry: {}", e);
            return Ok(());
        }
    };

    let health = Arc::new(HealthProber::new(
        registry.clone(),
        app_config.health_probe_timeout_secs,
        app_config.health_probe_interval_secs,
    ));
    health.clone().run_forever();

    let memory = Arc::new(ConversationMemory::new());
    let debug_store = Arc::new(DebugStore::new());

    let intent_identifier = Arc::new(IntentIdentifier::new(
        registry.clone(),
        app_config.llm.clone(),
        app_config.route_confidence_threshold,
        app_config.clarify_confidence_threshold,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        health.clone(),
        debug_store.clone(),
        app_config.worker_timeout_secs,
        app_config.worker_retry_backoff_ms,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        intent_identifier.clone(),
        dispatcher.clone(),
        memory.clone(),
        &app_config,
    ));

    let jwt_auth = match env::var("JWT_SECRET") {
        Ok(secret) if !secret.trim().is_empty() => {
            tracing::info!("JWT authentication enabled");
            Some(Arc::new(api::auth::JwtAuth::new(secret.as_bytes())))
        }
        Ok(_) => {
            tracing::warn!("JWT_SECRET is empty, authentication disabled");
            None
        }
        Err(_) => {
            tracing::warn!("JWT_SECRET not set, authentication disabled");
            None
        }
    };

    let rate_limit_requests = env::var("RATE_LIMIT_REQUESTS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|r| *r > 0)
        .unwrap_or(100);
    let requests = std::num::NonZeroU32::new(rate_limit_requests)
        .unwrap_or_else(|| std::num::NonZeroU32::new(100).expect("100 is non-zero"));
    let window_secs = env::var("RATE_LIMIT_WINDOW")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(60);

    let rate_limit_config = RateLimitConfig { requests, window_secs };
    tracing::info!(requests = rate_limit_config.requests.get(), window_secs, "rate limiting configured");

    let api_ctx = ApiContext {
        registry: registry.clone(),
        health: health.clone(),
        memory: memory.clone(),
        debug_store: debug_store.clone(),
        orchestrator: orchestrator.clone(),
        intent_identifier: intent_identifier.clone(),
        config: app_config.clone(),
        jwt_auth,
        rate_limit_config,
        app_env: app_env.clone(),
    };

    let bind_addr = env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8282".to_string());
    tracing::info!("starting API server on {}", bind_addr);

    let server = run_http_server(api_ctx, &bind_addr)?;
    let handle = server.handle();

    let shutdown_fut = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to install CTRL+C handler: {}", e);
            return;
        }
        tracing::info!("received CTRL+C, initiating graceful shutdown");
        handle.stop(true).await;
    };

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                tracing::error!("HTTP server error: {}", e);
            }
        }
        _ = shutdown_fut => {
            tracing::info!("shutdown signal handled");
        }
    }

    Ok(())
}
