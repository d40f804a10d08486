//! Error taxonomy for the backtest lifecycle client.
//!
//! Four classes matter to callers and each propagates differently:
//! validation stays local, transport errors are retryable, server-reported
//! failures are terminal, and unauthorized responses get their own class so
//! the caller can re-authenticate.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// A local, field-scoped validation failure. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Request field the check failed on (e.g. `"end_date"`).
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Normalized error for every backend interaction.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure or timeout. The backend job may still be running;
    /// polling and hydration flows retry these with bounded backoff.
    #[error("connection error: {0}")]
    Transport(String),

    /// Backend answered with a non-2xx status. Terminal, no retry.
    #[error("API error {status}: {detail}")]
    Server { status: StatusCode, detail: String },

    /// 401/403, surfaced distinctly so the caller can redirect to login.
    #[error("unauthorized ({status}): {detail}")]
    Unauthorized { status: StatusCode, detail: String },

    /// Backend payload did not match the expected schema.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Transport errors are the only class worth retrying; a server that
    /// already said "no" will keep saying it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// FastAPI-style error body: `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Normalize a non-2xx response into an [`ApiError`], preferring the
/// server's `detail` message and falling back to the raw body text.
pub async fn error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let detail = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.detail)
        .unwrap_or_else(|_| {
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                text
            }
        });

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ApiError::Unauthorized { status, detail }
    } else {
        ApiError::Server { status, detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_displays_field_and_message() {
        let err = ValidationError::new("end_date", "End date must be after start date");
        assert_eq!(err.to_string(), "end_date: End date must be after start date");
    }

    #[test]
    fn transport_is_the_only_retryable_class() {
        assert!(ApiError::Transport("connection refused".into()).is_retryable());
        assert!(!ApiError::Server {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "boom".into(),
        }
        .is_retryable());
        assert!(!ApiError::Decode("missing field".into()).is_retryable());
    }

    #[test]
    fn unauthorized_is_distinct() {
        let err = ApiError::Unauthorized {
            status: StatusCode::UNAUTHORIZED,
            detail: "Not authenticated".to_string(),
        };
        assert!(err.is_unauthorized());
        assert!(!err.is_retryable());
    }
}
