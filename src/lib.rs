//! Library crate backing the `llama-gateway` binary: an OpenAI-compatible
//! HTTP surface in front of locally-supervised `llama-server` processes.

pub mod api;
pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod estimator;
pub mod forwarder;
pub mod openai;
pub mod process;
pub mod selector;
pub mod state;
pub mod supervisor;

pub use config::Config;
pub use state::{AppState, SharedState};

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the full HTTP router: the OpenAI surface under `/v1`, plus the
/// ambient `/health` probe.
pub fn app(state: SharedState) -> Router {
    Router::new()
        .nest("/v1", api::router())
        .merge(api::health::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn shared_state(config: Config) -> SharedState {
    Arc::new(AppState::new(config))
}
