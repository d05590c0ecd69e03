//! `GET /v1/models` and `GET /v1/models/:id` — model listing and detail.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::openai::{ErrorBody, ErrorDetail};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/:id", get(model_info))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let data: Vec<_> = state
        .config
        .models
        .iter()
        .map(|m| {
            json!({
                "id": m.name,
                "object": "model",
                "created": 0,
                "owned_by": "gateway",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data })).into_response()
}

// `/v1/models/:id` returns a dedicated 404 on an unknown model, distinct
// from chat/completions' `ModelNotFound` (a 400, since there the model
// name comes from a request body the caller controls the validity of).
async fn model_info(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(model) = state.config.find_model(&id) else {
        let body = ErrorBody {
            error: ErrorDetail {
                message: format!("model not found: {id}"),
                error_type: "not_found_error".to_string(),
                code: None,
            },
        };
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    };

    let context_sizes: Vec<u32> = model.variants.iter().map(|v| v.context).collect();
    Json(json!({
        "id": model.name,
        "object": "model",
        "context_sizes": context_sizes,
    }))
    .into_response()
}
