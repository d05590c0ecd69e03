//! `POST /v1/completions` — structurally identical to chat completions,
//! differing only in which field is required (`prompt` instead of
//! `messages`).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::forwarder;
use crate::state::AppState;

const PATH: &str = "/v1/completions";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/completions", post(completions))
}

async fn completions(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::InvalidRequest(format!("invalid JSON body: {e}")))?;

    let model_name = value
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidRequest("model is required".to_string()))?
        .to_string();

    let has_prompt = value.get("prompt").and_then(Value::as_str).is_some();
    if !has_prompt {
        return Err(Error::InvalidRequest("prompt is required".to_string()));
    }
    let stream = value.get("stream").and_then(Value::as_bool).unwrap_or(false);

    // Global request lock: held as an owned guard, released only once a
    // streamed response body is fully drained, not when this fn returns.
    let permit = state.request_lock.clone().lock_owned().await;

    let model = forwarder::resolve_model(&state, &model_name)?;
    forwarder::forward(&state, model, PATH, value, stream, permit).await
}
