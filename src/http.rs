//! HTTP intake: channel webhooks plus the dev simulate surface.
//!
//! Webhook handlers resolve the tenant from the path, normalize, and run
//! the pipeline per message. A malformed payload gets a 400 with no side
//! effects; everything else gets a 200 so the provider stops retrying;
//! stage failures are inside the reports, not the status code.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::channels::normalize;
use crate::pipeline::types::Channel;
use crate::pipeline::Orchestrator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the Axum router for webhook intake and the dev surface.
pub fn routes(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/webhook/{channel}/{business_id}", post(webhook))
        .route("/dev/simulate", post(simulate))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "replyflow"
    }))
}

/// Channel webhook intake. One report per normalized message.
async fn webhook(
    State(state): State<AppState>,
    Path((channel, business_id)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let channel: Channel = match channel.parse() {
        Ok(c) => c,
        Err(e) => return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": e}))),
    };

    let messages = match normalize(&business_id, channel, &payload) {
        Ok(msgs) => msgs,
        Err(e) => {
            warn!(business_id = %business_id, channel = %channel, error = %e, "Webhook rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            );
        }
    };

    let mut reports = Vec::with_capacity(messages.len());
    for msg in &messages {
        reports.push(state.orchestrator.run(msg, false).await);
    }

    info!(
        business_id = %business_id,
        channel = %channel,
        messages = messages.len(),
        "Webhook processed"
    );
    (StatusCode::OK, Json(serde_json::json!({"reports": reports})))
}

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    business_id: String,
    channel: Channel,
    sender_handle: String,
    #[serde(default)]
    sender_name: Option<String>,
    text: String,
    /// Defaults to true: simulations don't hit provider APIs.
    #[serde(default = "default_true")]
    dry_run: bool,
}

fn default_true() -> bool {
    true
}

/// Dev/test surface: run the pipeline for a hand-written message and
/// return the per-stage report.
async fn simulate(
    State(state): State<AppState>,
    Json(req): Json<SimulateRequest>,
) -> impl IntoResponse {
    let msg = crate::pipeline::InboundMessage {
        conversation_id: crate::pipeline::InboundMessage::conversation_id_for(
            &req.business_id,
            req.channel,
            &req.sender_handle,
        ),
        business_id: req.business_id,
        channel: req.channel,
        sender_name: req.sender_name,
        sender_handle: req.sender_handle,
        message_text: req.text,
        timestamp: chrono::Utc::now(),
        metadata: crate::pipeline::MessageMetadata {
            provider_message_id: Some(format!("sim.{}", uuid::Uuid::new_v4())),
            is_echo: false,
            reply_target: None,
        },
    };

    let report = state.orchestrator.run(&msg, req.dry_run).await;
    (StatusCode::OK, Json(serde_json::json!(report.steps)))
}
