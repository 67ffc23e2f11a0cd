//! LINE webhook producer.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use db::JobSink;
use futures_util::future::join_all;
use jobs_core::HANDLE_CHAT_EVENT;
use serde::Deserialize;
use serde_json::{Value, json};

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    sink: Arc<dyn JobSink>,
}

/// LINE webhook body. Only `events` is read.
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Build the producer router: `POST /webhook/line` and `GET /health`.
pub fn router(sink: Arc<dyn JobSink>) -> Router {
    Router::new()
        .route("/webhook/line", post(line_webhook))
        .route("/health", get(health))
        .with_state(WebhookState { sink })
}

async fn health() -> &'static str {
    "ok"
}

/// Enqueue one `handle-chat-event` job per event and answer once all
/// enqueues have settled.
async fn line_webhook(State(state): State<WebhookState>, Json(body): Json<WebhookBody>) -> Response {
    tracing::info!(events = body.events.len(), "Received LINE webhook");

    let pushes = body.events.into_iter().map(|event| {
        tracing::debug!("Received event: {}", event);
        state
            .sink
            .push(HANDLE_CHAT_EVENT.to_string(), json!({ "event": event }), None)
    });
    let results = join_all(pushes).await;

    let mut failed = false;
    for result in &results {
        match result {
            Ok(job_id) => tracing::debug!(%job_id, "Queued chat event"),
            Err(e) => {
                tracing::error!("Failed to enqueue chat event: {}", e);
                failed = true;
            }
        }
    }

    if failed {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let acks = vec![Value::Null; results.len()];
    Json(acks).into_response()
}
