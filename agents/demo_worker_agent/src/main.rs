//! Reference implementation of the worker contract the supervisor
//! dispatches against: `GET /health` and `POST /process`. Stands in for
//! the generic LLM wrapper agent during local development and integration
//! tests — it does not call out to a real model, it just echoes the
//! shaped request back in a `CompletionReport`.

use actix_web::{web, App, HttpResponse, HttpServer};
use chrono::Utc;
use serde_json::json;
use shared_types::{CompletionReport, CompletionStatus, TaskEnvelope};
use std::env;
use uuid::Uuid;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"status": "healthy"}))
}

async fn process(envelope: web::Json<TaskEnvelope>) -> HttpResponse {
    let envelope = envelope.into_inner();
    tracing::info!(task = %envelope.task.name, recipient = %envelope.recipient, "processing task");

    let request_text = envelope
        .task
        .parameters
        .get("request")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let report = if request_text.trim().is_empty() {
        CompletionReport {
            message_id: Uuid::new_v4(),
            sender: envelope.recipient.clone(),
            recipient: envelope.sender.clone(),
            kind: "completion_report".to_string(),
            related_message_id: envelope.message_id,
            status: CompletionStatus::Failure,
            results: json!({"error": "empty request"}),
            timestamp: Utc::now(),
        }
    } else {
        CompletionReport {
            message_id: Uuid::new_v4(),
            sender: envelope.recipient.clone(),
            recipient: envelope.sender.clone(),
            kind: "completion_report".to_string(),
            related_message_id: envelope.message_id,
            status: CompletionStatus::Success,
            results: json!({"output": format!("Acknowledged: {}", request_text)}),
            timestamp: Utc::now(),
        }
    };

    HttpResponse::Ok().json(report)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    platform::init_tracing("demo_worker_agent").expect("failed to init tracing");

    let bind_addr = env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8301".to_string());
    tracing::info!("demo worker agent listening on {}", bind_addr);

    HttpServer::new(|| {
        App::new()
            .route("/health", web::get().to(health))
            .route("/process", web::post().to(process))
    })
    .bind(&bind_addr)?
    .run()
    .await
}
