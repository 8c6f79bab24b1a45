use thiserror::Error as ThisError;

use super::GatewayError;

/// Toast text shown for any failure that is not a validation message.
pub const GENERIC_USER_MESSAGE: &str = "Something went wrong. Please try again.";

/// Error returned by every store action.
#[derive(Debug, ThisError)]
pub enum PilotError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Input refused before any network round-trip.
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ractor error: {0}")]
    Ractor(String),
}

impl PilotError {
    pub fn validation(message: impl Into<String>) -> Self {
        PilotError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PilotError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Message suitable for an ephemeral toast.
    pub fn user_message(&self) -> String {
        match self {
            PilotError::Validation(message) => message.clone(),
            PilotError::Gateway(GatewayError::Unauthenticated) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            _ => GENERIC_USER_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_text_reaches_the_user() {
        let err = PilotError::validation("Task title is required");
        assert_eq!(err.user_message(), "Task title is required");

        let err = PilotError::from(GatewayError::Rejected("row level security".to_string()));
        assert_eq!(err.user_message(), GENERIC_USER_MESSAGE);
    }
}
