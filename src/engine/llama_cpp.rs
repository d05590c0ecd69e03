//! Concrete engine client for `llama-server` (llama.cpp).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use super::{EngineClient, EngineResponse};
use crate::error::{Error, Result};

const SUPPORTED_ENDPOINTS: &[&str] = &[
    "/v1/chat/completions",
    "/v1/completions",
    "/v1/embeddings",
];

/// OpenAI fields `llama-server` has historically rejected outright. Kept as
/// data (not code) per the spec's explicit guidance and deliberately
/// permissive: only fields known to cause a hard error are listed.
fn default_stripped_fields() -> &'static [&'static str] {
    &["user", "logprobs", "top_logprobs", "service_tier"]
}

pub struct LlamaEngineClient {
    http: Client,
    base_url: String,
    sideload: bool,
    stripped_fields: Vec<String>,
    /// Token reservation assumed for a request that omits `max_tokens`
    /// (§9): the estimator must never silently treat an absent `max_tokens`
    /// as zero.
    default_max_tokens_reservation: u32,
}

impl LlamaEngineClient {
    pub fn new(base_url: String, sideload: bool, default_max_tokens_reservation: u32) -> Self {
        Self {
            http: Client::new(),
            base_url,
            sideload,
            stripped_fields: default_stripped_fields().iter().map(|s| s.to_string()).collect(),
            default_max_tokens_reservation,
        }
    }

    #[cfg(test)]
    pub fn with_stripped_fields(base_url: String, stripped_fields: Vec<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            sideload: false,
            stripped_fields,
            default_max_tokens_reservation: 1024,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

}

#[async_trait]
impl EngineClient for LlamaEngineClient {
    fn supported_endpoints(&self) -> &'static [&'static str] {
        SUPPORTED_ENDPOINTS
    }

    fn transform_request(&self, _path: &str, mut body: Value) -> Value {
        if let Value::Object(map) = &mut body {
            let mut elided: HashSet<&str> = HashSet::new();
            for field in &self.stripped_fields {
                if map.remove(field.as_str()).is_some() {
                    elided.insert(field.as_str());
                }
            }
            for field in elided {
                tracing::warn!(field, "elided unsupported field from request");
            }
        }
        body
    }

    fn transform_response(&self, _path: &str, body: Value) -> Value {
        // llama-server already speaks OpenAI shape for chat/completions.
        body
    }

    async fn check_health(&self, timeout: Duration) -> bool {
        let primary = self.http.get(self.url("/health")).timeout(timeout).send().await;
        match primary {
            Ok(resp) if resp.status().is_success() => return true,
            _ => {}
        }
        // Fall back to /v1/models on 404 (older servers without /health).
        matches!(
            self.http.get(self.url("/v1/models")).timeout(timeout).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    async fn forward(&self, path: &str, body: Value, stream: bool) -> Result<EngineResponse> {
        let transformed = self.transform_request(path, body);
        let response = self
            .http
            .post(self.url(path))
            .json(&transformed)
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: e.to_string(),
            })?;

        let status = response.status();

        if stream {
            let chunks = response
                .bytes_stream()
                .map(|result| result.map_err(std::io::Error::other))
                .boxed();
            return Ok(EngineResponse::Stream { status, chunks });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream { status, body: text });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Upstream { status, body: e.to_string() })?;
        Ok(EngineResponse::Buffered {
            status,
            body: self.transform_response(path, body),
        })
    }

    fn supports_online_tokenization(&self) -> bool {
        !self.sideload
    }

    async fn estimate_tokens(&self, path: &str, body: &Value) -> Result<u32> {
        let (text, _) = crate::estimator::tokenizable_text_and_count(path, body);
        let response = self
            .http
            .post(self.url("/tokenize"))
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| Error::Estimation(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Estimation(format!(
                "engine /tokenize returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await.map_err(|e| Error::Estimation(e.to_string()))?;
        let tokens = parsed
            .get("tokens")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Estimation("missing tokens array in /tokenize response".to_string()))?;

        let max_tokens =
            crate::estimator::effective_max_tokens(body, self.default_max_tokens_reservation);
        Ok(tokens.len() as u32 + max_tokens)
    }
}
