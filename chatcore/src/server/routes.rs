//! Route handlers (`SPEC_FULL.md` §6).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use tower_http::trace::TraceLayer;

use crate::config::ConfigPatch;
use crate::error::OrchestratorError;
use crate::hub::HubMessage;
use crate::types::ChatRequest;

use super::state::AppState;

/// Build the full router: Stage A, Stage B, config, and a health check.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(post_chat))
        .route("/v1/steps/{step_id}/events", get(get_step_events))
        .route("/v1/config", put(put_config))
        .route("/v1/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn put_config(State(state): State<AppState>, Json(patch): Json<ConfigPatch>) -> StatusCode {
    state.orchestrator.update_config(patch).await;
    StatusCode::NO_CONTENT
}

async fn healthz() -> &'static str {
    "ok"
}

async fn post_chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    match state.orchestrator.handle_chat(request).await {
        Ok(events) => {
            let body = events.map(|event| {
                let mut line = serde_json::to_string(&event).unwrap_or_default();
                line.push('\n');
                Ok::<Bytes, Infallible>(Bytes::from(line))
            });
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/x-ndjson")
                .body(Body::from_stream(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(err) => error_response(&err),
    }
}

async fn get_step_events(
    State(state): State<AppState>,
    Path(step_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let events = state.orchestrator.subscribe(&step_id).await.filter_map(|message| async move {
        match message {
            HubMessage::Event(event) => serde_json::to_string(&event).ok().map(|json| Ok(SseEvent::default().data(json))),
            HubMessage::Heartbeat => Some(Ok(SseEvent::default().comment("heartbeat"))),
            HubMessage::Lag { dropped } => {
                tracing::warn!(step_id = %step_id, dropped, "stage B subscriber lagged");
                None
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn error_response(err: &OrchestratorError) -> Response {
    let status = match err.kind() {
        "BAD_REQUEST" => StatusCode::BAD_REQUEST,
        "DECISION_ERROR" => StatusCode::BAD_GATEWAY,
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        "CANCELLED" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({ "error": { "kind": err.kind(), "message": err.to_string() } });
    (status, Json(body)).into_response()
}
