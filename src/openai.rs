//! OpenAI-compatible error shape shared by the error taxonomy and the
//! handlers that construct their own error responses directly.

use serde::{Deserialize, Serialize};

/// Shape of the `{"error": {...}}` body relayed verbatim from upstream, or
/// constructed locally for validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_omits_code_when_absent() {
        let body = ErrorBody {
            error: ErrorDetail {
                message: "model not found: foo".to_string(),
                error_type: "not_found_error".to_string(),
                code: None,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["type"], "not_found_error");
        assert!(json["error"].get("code").is_none());
    }
}
