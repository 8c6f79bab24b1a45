//! LLM chat: the context prompt, the client side of `/api/ai`, and the
//! upstream completion client the service forwards to.

mod client;
mod context;
mod upstream;

pub use client::{AssistantClient, CHAT_FALLBACK_REPLY, ChatSession, EMPTY_REPLY};
pub use context::{MAX_PENDING_IN_CONTEXT, build_context};
pub use upstream::UpstreamClient;

use serde_json::{Value, json};

use crate::error::LlmError;

/// Maps a non-2xx upstream answer into [`LlmError::UpstreamStatus`], keeping its JSON body.
async fn upstream_status_error(resp: reqwest::Response) -> LlmError {
    let status = resp.status();
    let body = match resp.bytes().await {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| json!({ "error": String::from_utf8_lossy(&bytes) })),
        Err(e) => json!({ "error": e.to_string() }),
    };
    LlmError::UpstreamStatus { status, body }
}
