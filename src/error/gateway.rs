use reqwest::StatusCode;
use thiserror::Error as ThisError;

use super::IsRetryable;

/// Failure talking to the remote data gateway.
#[derive(Debug, ThisError)]
pub enum GatewayError {
    /// Transport-level failure (DNS, connect, timeouts, etc).
    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Gateway returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("Failed to decode gateway payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request reached the backend and was refused (constraint, policy).
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Not supported by this gateway: {0}")]
    NotSupported(String),

    #[error("Change stream closed")]
    Closed,

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl GatewayError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

impl IsRetryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Closed => true,
            GatewayError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_retry() {
        let busy = GatewayError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "busy".to_string(),
        };
        let conflict = GatewayError::Status {
            status: StatusCode::CONFLICT,
            message: "duplicate key".to_string(),
        };
        assert!(busy.is_retryable());
        assert!(GatewayError::Closed.is_retryable());
        assert!(!conflict.is_retryable());
        assert!(!GatewayError::Rejected("policy".to_string()).is_retryable());
        assert_eq!(conflict.status(), Some(StatusCode::CONFLICT));
    }
}
