//! Shared forwarding plumbing used by the chat and completions handlers:
//! select a variant, ensure it is live, forward the body, and shape the
//! response (including SSE passthrough for `stream=true`).

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

use crate::config::Model;
use crate::engine::EngineResponse;
use crate::error::{Error, Result};
use crate::estimate;
use crate::selector;
use crate::state::AppState;

/// Resolves `model_name` against the configuration, fails with
/// `ModelNotFound` otherwise.
pub fn resolve_model<'a>(state: &'a AppState, model_name: &str) -> Result<&'a Model> {
    state
        .config
        .find_model(model_name)
        .ok_or_else(|| Error::ModelNotFound(model_name.to_string()))
}

/// Wraps a chunk stream together with the global request lock's owned
/// guard, so the lock is only released once the response body itself is
/// fully drained or dropped — not when the handler returns after headers.
struct GuardedStream<S> {
    inner: S,
    _permit: OwnedMutexGuard<()>,
}

impl<S> Stream for GuardedStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

/// Runs select → ensure → forward → shape-response for a single path,
/// given an already-computed token estimate. `permit` is the global
/// request lock's owned guard (§5): the caller acquires it before calling
/// this, and it is held for the full duration of the request, including
/// streamed bodies drained after this function returns.
pub async fn forward(
    state: &AppState,
    model: &Model,
    path: &'static str,
    body: Value,
    stream: bool,
    permit: OwnedMutexGuard<()>,
) -> Result<Response> {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("forward", %request_id, model = %model.name, path);
    forward_inner(state, model, path, body, stream, permit)
        .instrument(span)
        .await
}

async fn forward_inner(
    state: &AppState,
    model: &Model,
    path: &'static str,
    body: Value,
    stream: bool,
    permit: OwnedMutexGuard<()>,
) -> Result<Response> {
    let est = estimate::estimate(state, model, path, &body).await?;
    let required = selector::required_capacity(
        est,
        state.config.server.safety_absolute,
        state.config.server.safety_fraction,
    );
    let variant = selector::select_variant(model, required)?;

    let client = state.supervisor.ensure(model, variant).await?;

    if !client.supported_endpoints().contains(&path) {
        return Err(Error::InvalidRequest(format!(
            "model {} does not support {}",
            model.name, path
        )));
    }

    state.supervisor.touch_activity().await;

    let seq = state.dump_writer.as_ref().map(|w| w.write_request(&body));

    let response = client.forward(path, body, stream).await?;

    match response {
        EngineResponse::Buffered { status, body } => {
            if let (Some(writer), Some(seq)) = (&state.dump_writer, seq) {
                writer.write_response(seq, &body);
            }
            if status.is_success() {
                Ok((StatusCode::OK, Json(body)).into_response())
            } else {
                Err(Error::Upstream {
                    status,
                    body: body.to_string(),
                })
            }
        }
        EngineResponse::Stream { status, chunks } => {
            if !status.is_success() {
                return Err(Error::Upstream {
                    status,
                    body: "upstream rejected streaming request".to_string(),
                });
            }
            let guarded = GuardedStream {
                inner: chunks,
                _permit: permit,
            };
            let response_body = Body::from_stream(guarded);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::CONNECTION, "keep-alive")
                .body(response_body)
                .unwrap()
                .into_response())
        }
    }
}
