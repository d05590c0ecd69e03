//! `GET /health` — ambient liveness probe, not part of the OpenAI surface.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let current_model = state.supervisor.current_model_name().await;
    Json(json!({
        "status": "ok",
        "engine": current_model,
    }))
    .into_response()
}
