//! Engine client abstraction layer.
//!
//! An `EngineClient` fronts one running inference engine process (a
//! `llama-server` or similar). It exposes the engine's fixed capabilities
//! (supported endpoints, request/response shaping, health) and two
//! concrete behaviors built from them (`forward`, `estimate_tokens`).

pub mod llama_cpp;

pub use llama_cpp::LlamaEngineClient;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::Result;

/// Response from a forwarded call: either a fully-buffered JSON body, or a
/// chunk stream (used for `stream=true` requests).
pub enum EngineResponse {
    Buffered {
        status: reqwest::StatusCode,
        body: Value,
    },
    Stream {
        status: reqwest::StatusCode,
        chunks: BoxStream<'static, std::result::Result<Bytes, std::io::Error>>,
    },
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Static per engine type: the set of paths this client accepts.
    fn supported_endpoints(&self) -> &'static [&'static str];

    /// Removes or rewrites fields the engine does not accept. Must not
    /// alter the semantics of fields it keeps. Logs a warning per elided
    /// field, deduplicated per request.
    fn transform_request(&self, path: &str, body: Value) -> Value;

    /// Identity for engines that already speak OpenAI shape.
    fn transform_response(&self, path: &str, body: Value) -> Value;

    /// Non-throwing health probe. False on connect refusal, 5xx, timeout.
    async fn check_health(&self, timeout: Duration) -> bool;

    /// Applies `transform_request`, issues the upstream call, and returns
    /// either a buffered body or a chunk stream depending on `stream`.
    async fn forward(&self, path: &str, body: Value, stream: bool) -> Result<EngineResponse>;

    /// True when this client can count tokens via the live engine (the
    /// `/tokenize` endpoint), as opposed to requiring the offline estimator.
    fn supports_online_tokenization(&self) -> bool {
        true
    }

    /// Token count for a request body, via the engine's `/tokenize`.
    async fn estimate_tokens(&self, path: &str, body: &Value) -> Result<u32>;
}
