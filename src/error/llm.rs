use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use thiserror::Error as ThisError;

use super::{ApiErrorBody, ApiErrorObject};

/// Upstream body characters kept in logs.
const UPSTREAM_BODY_PREVIEW_CHARS: usize = 500;

/// Failure of a chat completion call, on either side of `/api/ai`.
#[derive(Debug, ThisError)]
pub enum LlmError {
    #[error("Request rejected")]
    RequestRejected {
        status: StatusCode,
        body: ApiErrorObject,
        debug_message: Option<String>,
    },

    /// Upstream answered non-2xx; status and JSON body are passed through.
    #[error("Upstream returned {status}")]
    UpstreamStatus { status: StatusCode, body: Value },

    /// Transport-level failure (DNS, connect, timeouts, etc).
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Failed to decode completion: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for LlmError {
    fn from(rejection: JsonRejection) -> Self {
        let debug_message = rejection.to_string();
        match rejection {
            JsonRejection::BytesRejection(e) => {
                LlmError::Internal(format!("Failed to read request body: {e}"))
            }
            JsonRejection::JsonSyntaxError(_) => LlmError::RequestRejected {
                status: StatusCode::BAD_REQUEST,
                body: ApiErrorObject::new("INVALID_JSON", "invalid JSON"),
                debug_message: Some(debug_message),
            },
            _ => LlmError::RequestRejected {
                status: StatusCode::BAD_REQUEST,
                body: ApiErrorObject::new("INVALID_REQUEST", "invalid request"),
                debug_message: Some(debug_message),
            },
        }
    }
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let (status, error_body) = match self {
            LlmError::RequestRejected {
                status,
                body,
                debug_message,
            } => {
                tracing::warn!(
                    status = %status,
                    code = %body.code,
                    debug_message = ?debug_message,
                    "Assistant request rejected"
                );
                (status, body)
            }

            LlmError::UpstreamStatus { status, body } => {
                let raw = body.to_string();
                tracing::warn!(
                    status = %status,
                    raw_body = %format!("{:.len$}", raw, len = UPSTREAM_BODY_PREVIEW_CHARS),
                    "LLM upstream error"
                );
                return (status, Json(body)).into_response();
            }

            LlmError::Reqwest(e) => {
                tracing::warn!(error = %e, status = ?e.status(), "LLM reqwest error");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiErrorObject::new("UPSTREAM_ERROR", "Upstream service error."),
                )
            }

            LlmError::Decode(e) => {
                tracing::warn!(error = %e, "LLM upstream payload undecodable");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiErrorObject::new("BAD_UPSTREAM_PAYLOAD", "Failed to parse upstream response."),
                )
            }

            LlmError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiErrorObject::new("RATE_LIMIT", "Too many requests, slow down."),
            ),

            LlmError::Internal(e) => {
                tracing::error!(error = %e, "Assistant internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorObject::new("INTERNAL_ERROR", "An internal server error occurred."),
                )
            }
        };

        (status, Json(ApiErrorBody { inner: error_body })).into_response()
    }
}
