use planpilot_schema::{AssistantRequest, AssistantResponse, ChatMessage};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::upstream_status_error;
use crate::error::LlmError;

/// Reply recorded when the chat call fails.
pub const CHAT_FALLBACK_REPLY: &str = "Something went wrong. Check your API key and try again.";

/// Reply recorded when the completion came back empty.
pub const EMPTY_REPLY: &str = "Sorry, I couldn't respond. Try again!";

/// Stateless client of the `/api/ai` endpoint.
#[derive(Clone)]
pub struct AssistantClient {
    client: reqwest::Client,
    endpoint: Url,
    access_key: Option<String>,
}

impl AssistantClient {
    pub fn new(endpoint: Url, access_key: Option<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("planpilot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self::with_client(client, endpoint, access_key))
    }

    pub fn with_client(client: reqwest::Client, endpoint: Url, access_key: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            access_key: access_key.filter(|k| !k.is_empty()),
        }
    }

    /// One completion; no retry, no streaming.
    pub async fn complete(&self, request: &AssistantRequest) -> Result<String, LlmError> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(key) = &self.access_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| LlmError::Internal(format!("invalid access key: {e}")))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        let resp = builder.send().await?;
        if !resp.status().is_success() {
            return Err(upstream_status_error(resp).await);
        }
        let body: AssistantResponse = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(body.first_text().unwrap_or_default().to_string())
    }
}

/// One conversation with the assistant.
pub struct ChatSession {
    client: AssistantClient,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
}

impl ChatSession {
    pub fn new(client: AssistantClient, max_tokens: Option<u32>) -> Self {
        Self {
            client,
            messages: Vec::new(),
            max_tokens,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Sends `input` with the given system prompt and records the reply.
    ///
    /// Blank input is ignored (`Ok(None)`). On failure the fallback reply is
    /// recorded and the error is returned.
    pub async fn send(&mut self, input: &str, system: String) -> Result<Option<String>, LlmError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(None);
        }
        self.messages.push(ChatMessage::user(input));
        let request = AssistantRequest {
            system: Some(system),
            messages: self.messages.clone(),
            max_tokens: self.max_tokens,
        };

        match self.client.complete(&request).await {
            Ok(reply) => {
                let reply = if reply.trim().is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    reply
                };
                debug!(turns = self.messages.len(), "assistant replied");
                self.messages.push(ChatMessage::assistant(reply.clone()));
                Ok(Some(reply))
            }
            Err(err) => {
                warn!(error = %err, "assistant call failed");
                self.messages.push(ChatMessage::assistant(CHAT_FALLBACK_REPLY));
                Err(err)
            }
        }
    }
}
