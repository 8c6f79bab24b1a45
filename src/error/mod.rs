mod api;
mod gateway;
mod llm;
mod pilot;

pub use api::{ApiErrorBody, ApiErrorObject};
pub use gateway::GatewayError;
pub use llm::LlmError;
pub use pilot::{GENERIC_USER_MESSAGE, PilotError};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
