use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use crate::state::AdminState;

/// Health and metrics on their own listener, plus the manual
/// backend-state reset hook.
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/state/reset", post(reset_state))
        .with_state(state)
}

async fn health(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.metrics.uptime_seconds(),
        "start_time": state.metrics.started_at_rfc3339(),
    }))
}

async fn metrics(State(state): State<Arc<AdminState>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Forgets which template the proxy believes is resident in slot 0. For
/// use after the backend was restarted underneath the proxy.
async fn reset_state(State(state): State<Arc<AdminState>>) -> Json<Value> {
    state.backend_state.reset();
    info!("backend state reset");
    Json(json!({ "ok": true }))
}
