//! `POST /v1/chat/completions` — OpenAI-compatible chat completion.

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

const PATH: &str = "/v1/chat/completions";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

async fn chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::InvalidRequest(format!("invalid JSON body: {e}")))?;

    let model_name = value
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidRequest("model is required".to_string()))?
        .to_string();

    let messages_non_empty = value
        .get("messages")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    if !messages_non_empty {
        return Err(Error::InvalidRequest("messages must be a non-empty array".to_string()));
    }
    let stream = value.get("stream").and_then(Value::as_bool).unwrap_or(false);

    // Global request lock: exactly one inference request in flight from here
    // on, held as an owned guard so it survives past this function returning
    // and is only released once a streamed response body is fully drained.
    let permit = state.request_lock.clone().lock_owned().await;

    let model = forwarder::resolve_model(&state, &model_name)?;
    forwarder::forward(&state, model, PATH, value, stream, permit).await
}
