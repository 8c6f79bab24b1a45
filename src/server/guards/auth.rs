use crate::server::router::PilotState;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

/// Bearer key check for `/api/ai`. An empty configured key disables it.
#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth;

impl FromRequestParts<PilotState> for RequireKeyAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &PilotState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.access_key.as_ref();
        if expected.is_empty() {
            return Ok(RequireKeyAuth);
        }

        match parts.headers.typed_get::<Authorization<Bearer>>() {
            Some(auth) => {
                if auth.token().as_bytes().ct_eq(expected.as_bytes()).into() {
                    Ok(RequireKeyAuth)
                } else {
                    Err(AuthError::InvalidKey)
                }
            }
            None => Err(AuthError::MissingKey),
        }
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let reason = match self {
            AuthError::MissingKey => "Missing API key",
            AuthError::InvalidKey => "Invalid API key",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized", "reason": reason })),
        )
            .into_response()
    }
}
