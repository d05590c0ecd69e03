//! Dispatches token estimation to the online, offline, or heuristic path
//! per the Variant Selector's policy (§4.4 step 2).

use serde_json::Value;

use crate::config::Model;
use crate::error::Result;
use crate::estimator::{self, tokenizable_text_and_count};
use crate::state::AppState;

pub async fn estimate(state: &AppState, model: &Model, path: &str, body: &Value) -> Result<u32> {
    if let Some(client) = state.supervisor.online_client_for(&model.name).await {
        return client.estimate_tokens(path, body).await;
    }

    let default_reservation = state.config.server.default_max_tokens_reservation;

    if let Some(spec) = &model.tokenization {
        match estimator::estimate_offline(spec, path, body, default_reservation).await {
            Ok(estimate) => return Ok(estimate),
            Err(e) => {
                tracing::warn!(error = %e, model = %model.name, "offline token estimation failed, falling back to heuristic");
            }
        }
    } else {
        tracing::warn!(model = %model.name, "no tokenizer configured, falling back to character heuristic");
    }

    let (text, _) = tokenizable_text_and_count(path, body);
    let max_tokens = estimator::effective_max_tokens(body, default_reservation);
    Ok(estimator::heuristic_char_estimate(&text) + max_tokens)
}
