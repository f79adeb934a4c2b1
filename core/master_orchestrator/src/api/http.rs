use actix_web::{web, Error, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use super::auth::verify_auth;
use super::ApiContext;
use platform::{correlation_span, extract_correlation_id, record_counter};
use shared_types::{AgentStatusView, SupervisorReply, SupervisorRequest};
use tracing::{error, info, Instrument};

pub fn configure(cfg: &mut web::ServiceConfig, ctx: ApiContext) {
    let ctx_data = web::Data::new(ctx);

    cfg.app_data(ctx_data)
        .route("/request", web::post().to(handle_request))
        .route("/registry", web::get().to(list_registry))
        .route("/agent/{id}/health", web::get().to(agent_health))
        .route("/conversation/history", web::get().to(conversation_history))
        .route("/conversation/summary", web::get().to(conversation_summary))
        .route("/conversation/clear", web::delete().to(conversation_clear))
        .route("/identify-intent", web::post().to(identify_intent))
        .route("/debug/last-agent-response", web::get().to(debug_last_agent_response))
        .route("/healthz", web::get().to(healthz));
}

/// Authenticates the request when `ctx.jwt_auth` is configured; a `None`
/// auth handler means authentication is disabled entirely. On success the
/// claims are stashed in the request extensions for `resolve_user_id` and
/// the rate-limit/audit middleware downstream.
async fn require_auth(req: &HttpRequest, ctx: &ApiContext) -> Result<(), HttpResponse> {
    if let Some(jwt_auth) = &ctx.jwt_auth {
        match verify_auth(req, jwt_auth).await {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
                Ok(())
            }
            Err(_) => Err(HttpResponse::Unauthorized().finish()),
        }
    } else {
        Ok(())
    }
}

/// Resolution order: JWT subject, `X-User-Id` header, `conversationId` body
/// field, then a shared "anonymous" partition.
fn resolve_user_id(req: &HttpRequest, conversation_id: Option<&str>) -> String {
    if let Some(claims) = req.extensions().get::<super::auth::Claims>() {
        return claims.sub.clone();
    }
    if let Some(header) = req.headers().get("X-User-Id").and_then(|h| h.to_str().ok()) {
        if !header.is_empty() {
            return header.to_string();
        }
    }
    if let Some(id) = conversation_id {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    "anonymous".to_string()
}

async fn handle_request(req: HttpRequest, body: web::Json<SupervisorRequest>, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    let correlation_id = extract_correlation_id(None);
    let span = correlation_span(correlation_id, "handle_request");

    async move {
        if let Err(resp) = require_auth(&req, ctx.get_ref()).await {
            return Ok(resp);
        }
        record_counter("http_requests_total_request", 1);

        let payload = body.into_inner();
        let user_id = resolve_user_id(&req, payload.conversation_id.as_deref());

        info!(correlation_id = %correlation_id, user_id, "dispatching supervisor request");

        let reply = ctx
            .orchestrator
            .handle(&user_id, &payload.request, payload.agent_id.as_deref(), payload.auto_route)
            .await;

        match &reply {
            SupervisorReply::Response(r) if r.error.is_some() => {
                error!(correlation_id = %correlation_id, user_id, error = ?r.error, "supervisor request completed with an error")
            }
            _ => info!(correlation_id = %correlation_id, user_id, "supervisor request completed"),
        }

        Ok(HttpResponse::Ok().json(reply))
    }
    .instrument(span)
    .await
}

async fn list_registry(req: HttpRequest, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    if let Err(resp) = require_auth(&req, ctx.get_ref()).await {
        return Ok(resp);
    }
    record_counter("http_requests_total_registry", 1);
    let views: Vec<AgentStatusView> = ctx.registry.list().iter().map(AgentStatusView::from).collect();
    Ok(HttpResponse::Ok().json(views))
}

async fn agent_health(req: HttpRequest, path: web::Path<String>, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    if let Err(resp) = require_auth(&req, ctx.get_ref()).await {
        return Ok(resp);
    }
    record_counter("http_requests_total_agent_health", 1);
    let agent_id = path.into_inner();
    let status = ctx.health.probe(&agent_id).await;
    Ok(HttpResponse::Ok().json(serde_json::json!({"agent_id": agent_id, "status": status})))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn conversation_history(req: HttpRequest, query: web::Query<HistoryQuery>, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    if let Err(resp) = require_auth(&req, ctx.get_ref()).await {
        return Ok(resp);
    }
    record_counter("http_requests_total_conversation_history", 1);
    let user_id = resolve_user_id(&req, None);
    let limit = query.limit.unwrap_or(ctx.config.conversation_history_limit);
    let history = ctx.memory.history(&user_id, limit).await;
    Ok(HttpResponse::Ok().json(history))
}

async fn conversation_summary(req: HttpRequest, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    if let Err(resp) = require_auth(&req, ctx.get_ref()).await {
        return Ok(resp);
    }
    record_counter("http_requests_total_conversation_summary", 1);
    let user_id = resolve_user_id(&req, None);
    let summary = ctx.memory.summary(&user_id).await;
    Ok(HttpResponse::Ok().json(summary))
}

async fn conversation_clear(req: HttpRequest, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    if let Err(resp) = require_auth(&req, ctx.get_ref()).await {
        return Ok(resp);
    }
    record_counter("http_requests_total_conversation_clear", 1);
    let user_id = resolve_user_id(&req, None);
    ctx.memory.clear(&user_id).await;
    Ok(HttpResponse::Ok().json(serde_json::json!({"cleared": true})))
}

#[derive(Deserialize)]
struct IdentifyIntentBody {
    request: String,
}

async fn identify_intent(req: HttpRequest, body: web::Json<IdentifyIntentBody>, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    if let Err(resp) = require_auth(&req, ctx.get_ref()).await {
        return Ok(resp);
    }
    record_counter("http_requests_total_identify_intent", 1);
    let user_id = resolve_user_id(&req, None);
    let history = ctx.memory.history(&user_id, ctx.config.conversation_history_limit).await;
    let intent = ctx.intent_identifier.identify(&body.request, &history).await;
    Ok(HttpResponse::Ok().json(intent))
}

#[derive(Deserialize)]
struct DebugQuery {
    agent_id: String,
}

/// Auth-gated: exposes the last raw worker response, which may carry
/// sensitive diagnostic detail even after redaction.
async fn debug_last_agent_response(req: HttpRequest, query: web::Query<DebugQuery>, ctx: web::Data<ApiContext>) -> Result<HttpResponse, Error> {
    if ctx.jwt_auth.is_some() {
        if require_auth(&req, ctx.get_ref()).await.is_err() {
            return Ok(HttpResponse::Unauthorized().finish());
        }
    }
    record_counter("http_requests_total_debug_last_agent_response", 1);
    match ctx.debug_store.last(&query.agent_id) {
        Some(entry) => Ok(HttpResponse::Ok().json(entry)),
        None => Ok(HttpResponse::NotFound().json(serde_json::json!({"message": "no response recorded for this agent"}))),
    }
}

#[derive(Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(HealthzResponse { status: "ok" })
}
