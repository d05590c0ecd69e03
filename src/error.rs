//! Error taxonomy for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::openai::{ErrorBody, ErrorDetail};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("context too large: required {required}, max available {max_context}")]
    ContextTooLarge { required: u32, max_context: u32 },

    #[error("token estimation failed: {0}")]
    Estimation(String),

    #[error("engine startup timed out after {0:?}")]
    EngineStartupTimeout(std::time::Duration),

    #[error("engine crashed: {0}")]
    EngineCrashed(String),

    #[error("upstream error ({status}): {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("client cancelled the request")]
    ClientCancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Upstream { status, body } = &self {
            // Relay upstream status/body largely unchanged; wrap only if it
            // isn't already a JSON object the caller can parse as an error.
            let json_body: serde_json::Value = serde_json::from_str(body).unwrap_or_else(|_| {
                serde_json::to_value(error_body("upstream_error", body, None)).unwrap()
            });
            return (*status, Json(json_body)).into_response();
        }

        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::ModelNotFound(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            Error::ContextTooLarge { .. } => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            Error::Estimation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Error::EngineStartupTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "upstream_error"),
            Error::EngineCrashed(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Error::Upstream { .. } => unreachable!(),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            Error::ClientCancelled => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let code = match &self {
            Error::ContextTooLarge { required, max_context } => {
                Some(format!("required={required},max_context={max_context}"))
            }
            _ => None,
        };

        (status, Json(error_body(error_type, &self.to_string(), code))).into_response()
    }
}

fn error_body(error_type: &str, message: &str, code: Option<String>) -> ErrorBody {
    ErrorBody {
        error: ErrorDetail {
            message: message.to_string(),
            error_type: error_type.to_string(),
            code,
        },
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_too_large_reports_required_and_max() {
        let err = Error::ContextTooLarge {
            required: 24200,
            max_context: 20480,
        };
        assert!(err.to_string().contains("24200"));
        assert!(err.to_string().contains("20480"));
    }
}
