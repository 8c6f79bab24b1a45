use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use planpilot_schema::{AssistantRequest, AssistantResponse};
use serde_json::json;
use tracing::debug;

use crate::error::LlmError;
use crate::server::router::PilotState;

pub fn router() -> Router<PilotState> {
    Router::new().route("/api/ai", post(ai_handler).fallback(method_not_allowed))
}

async fn ai_handler(
    State(state): State<PilotState>,
    payload: Result<Json<AssistantRequest>, JsonRejection>,
) -> Result<Json<AssistantResponse>, LlmError> {
    let Json(request) = payload?;
    if state.limiter.check().is_err() {
        return Err(LlmError::RateLimited);
    }
    debug!(
        messages = request.messages.len(),
        max_tokens = ?request.max_tokens,
        "Incoming assistant request"
    );
    let response = state.upstream.complete(request).await?;
    Ok(Json(response))
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
}
