//! Offline token estimation via a standalone tokenizer subprocess, plus the
//! crude character-count fallback. Operates directly on the JSON request
//! body so the same code path serves both chat and text completions.

use std::process::Stdio;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::TokenizerSpec;
use crate::error::{Error, Result};

/// Joins message contents with this separator before feeding the tokenizer;
/// the chat template is deliberately NOT applied, making this count less
/// precise than the online path.
const MESSAGE_SEPARATOR: &str = "\n";

/// Extracts the tokenizable text and an effective "message count" (used to
/// scale `extra_tokens_per_message`): for `/v1/completions` the prompt
/// counts as a single message.
pub fn tokenizable_text_and_count(path: &str, body: &Value) -> (String, u32) {
    if path == "/v1/completions" {
        let prompt = body.get("prompt").and_then(Value::as_str).unwrap_or("");
        (prompt.to_string(), 1)
    } else {
        let messages = body.get("messages").and_then(Value::as_array);
        let contents: Vec<&str> = messages
            .map(|ms| ms.iter().filter_map(|m| m.get("content").and_then(Value::as_str)).collect())
            .unwrap_or_default();
        let count = messages.map(|ms| ms.len() as u32).unwrap_or(0);
        (contents.join(MESSAGE_SEPARATOR), count)
    }
}

/// `max_tokens` from the request body, or `default_reservation` when the
/// request omits it — every estimation path must budget for the unbounded
/// worst case rather than silently assuming zero completion tokens.
pub fn effective_max_tokens(body: &Value, default_reservation: u32) -> u32 {
    body.get("max_tokens")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default_reservation)
}

pub async fn estimate_offline(
    spec: &TokenizerSpec,
    path: &str,
    body: &Value,
    default_reservation: u32,
) -> Result<u32> {
    let (text, message_count) = tokenizable_text_and_count(path, body);
    let raw = run_tokenizer(spec, &text).await?;
    let max_tokens = effective_max_tokens(body, default_reservation);
    Ok(raw + spec.extra_tokens_per_message * message_count + spec.extra_tokens + max_tokens)
}

async fn run_tokenizer(spec: &TokenizerSpec, text: &str) -> Result<u32> {
    let mut cmd = Command::new(&spec.binary);
    cmd.args(&spec.base_args)
        .args(&spec.extra_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Estimation(format!("failed to spawn tokenizer {}: {e}", spec.binary)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| Error::Estimation(format!("failed writing to tokenizer stdin: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| Error::Estimation(format!("failed waiting for tokenizer: {e}")))?;

    if !output.status.success() {
        return Err(Error::Estimation(format!(
            "tokenizer exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let count = stdout.split_whitespace().filter(|tok| tok.parse::<i64>().is_ok()).count();
    if count == 0 && !stdout.trim().is_empty() {
        return Err(Error::Estimation("tokenizer produced no parseable token ids".to_string()));
    }
    Ok(count as u32)
}

/// `ceil(total_char_count / 4)`, used when no engine is live and the model
/// has no `TokenizerSpec` — logged as a warning by the caller.
pub fn heuristic_char_estimate(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn offline_chat_estimate_matches_scenario_3() {
        let spec = TokenizerSpec {
            binary: "/bin/echo".to_string(),
            base_args: vec!["1 2 3 4 5 6 7 8 9 10".to_string()],
            extra_args: vec![],
            extra_tokens_per_message: 8,
            extra_tokens: 0,
        };
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ],
            "max_tokens": 100
        });
        let estimate = estimate_offline(&spec, "/v1/chat/completions", &body, 1024).await.unwrap();
        assert_eq!(estimate, 10 + 2 * 8 + 0 + 100);
    }

    #[tokio::test]
    async fn offline_estimate_uses_default_reservation_when_max_tokens_absent() {
        let spec = TokenizerSpec {
            binary: "/bin/echo".to_string(),
            base_args: vec!["1 2 3 4 5 6 7 8 9 10".to_string()],
            extra_args: vec![],
            extra_tokens_per_message: 8,
            extra_tokens: 0,
        };
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let estimate = estimate_offline(&spec, "/v1/chat/completions", &body, 256).await.unwrap();
        assert_eq!(estimate, 10 + 8 + 256);
    }

    #[test]
    fn effective_max_tokens_falls_back_to_default_reservation() {
        assert_eq!(effective_max_tokens(&json!({}), 1024), 1024);
        assert_eq!(effective_max_tokens(&json!({"max_tokens": 42}), 1024), 42);
    }

    #[test]
    fn heuristic_rounds_up() {
        assert_eq!(heuristic_char_estimate("abcd"), 1);
        assert_eq!(heuristic_char_estimate("abcde"), 2);
        assert_eq!(heuristic_char_estimate(""), 0);
    }

    #[test]
    fn tokenizable_text_treats_prompt_as_single_message() {
        let body = json!({"prompt": "once upon a time"});
        let (text, count) = tokenizable_text_and_count("/v1/completions", &body);
        assert_eq!(text, "once upon a time");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn tokenizer_failure_surfaces_as_estimation_error() {
        let spec = TokenizerSpec {
            binary: "/bin/sh".to_string(),
            base_args: vec!["-c".to_string(), "exit 1".to_string()],
            extra_args: vec![],
            extra_tokens_per_message: 0,
            extra_tokens: 0,
        };
        let result = run_tokenizer(&spec, "text").await;
        assert!(result.is_err());
    }
}
