//! HTTP ingestion endpoint.
//!
//! Accepts an event, normalizes it and hands it to the dispatch loop. The
//! response goes back as soon as the task is queued; delivery happens later.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::relay::normalize::{normalize, RawEvent};
use crate::relay::{RelaySender, RelayTask};

#[derive(Clone)]
struct IngestState {
    tx: RelaySender,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub status: &'static str,
    pub message: String,
}

impl Ack {
    fn success() -> Self {
        Self {
            status: "success",
            message: "Message received".to_string(),
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            status: "error",
            message: message.to_string(),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn receive_message(
    State(state): State<IngestState>,
    body: Bytes,
) -> (StatusCode, Json<Ack>) {
    let raw = match RawEvent::from_json(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Rejected inbound event");
            return (StatusCode::BAD_REQUEST, Json(Ack::error(e)));
        }
    };

    let message = normalize(raw);
    info!(
        channel = %message.channel_name,
        author = %message.author,
        chars = message.content.chars().count(),
        attachments = message.attachments.len(),
        embeds = message.embeds.len(),
        "Received message"
    );

    let task = RelayTask::new(message);
    debug!(task = %task.id, "Queueing relay task");
    if state.tx.send(task).is_err() {
        warn!("Dispatch loop is not running, dropping message");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Ack::error("relay is not running")),
        );
    }

    (StatusCode::OK, Json(Ack::success()))
}

pub fn router(path: &str, tx: RelaySender) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(path, post(receive_message))
        .with_state(IngestState { tx })
}

/// Serve the ingestion endpoint until the process exits.
pub async fn serve(bind: &str, path: &str, tx: RelaySender) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind ingestion endpoint to {bind}"))?;

    info!("Ingestion endpoint listening on http://{bind}{path}");

    axum::serve(listener, router(path, tx))
        .await
        .context("Ingestion server error")?;

    Ok(())
}
