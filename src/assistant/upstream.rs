use planpilot_schema::{
    AssistantRequest, AssistantResponse, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use url::Url;

use super::upstream_status_error;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::utils::logging::with_pretty_json_debug;

/// OpenAI-compatible `chat/completions` client used by `POST /api/ai`.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: Url,
    api_key: Arc<str>,
    model: Arc<str>,
    max_tokens: u32,
}

impl UpstreamClient {
    pub fn new(cfg: &LlmConfig) -> Self {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("planpilot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .http2_adaptive_window(true);

        if let Some(proxy_url) = cfg.proxy.as_ref() {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .expect("invalid proxy url for reqwest client");
            builder = builder.proxy(proxy);
        }

        let client = builder.build().expect("failed to build reqwest client");
        Self::with_client(cfg, client)
    }

    pub fn with_client(cfg: &LlmConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            url: cfg.upstream_url.clone(),
            api_key: Arc::from(cfg.api_key.as_str()),
            model: Arc::from(cfg.model.as_str()),
            max_tokens: cfg.max_tokens,
        }
    }

    /// Builds the completion body: the system prompt first, then the conversation.
    pub fn completion_request(&self, request: AssistantRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(request.system.unwrap_or_default()));
        messages.extend(request.messages);
        ChatCompletionRequest {
            model: self.model.to_string(),
            max_tokens: request.max_tokens.filter(|n| *n > 0).unwrap_or(self.max_tokens),
            messages,
        }
    }

    pub async fn complete(&self, request: AssistantRequest) -> Result<AssistantResponse, LlmError> {
        let body = self.completion_request(request);
        with_pretty_json_debug(&body, |json| {
            tracing::debug!(body = %json, "LLM upstream request");
        });
        let start = Instant::now();
        let resp = self
            .client
            .post(self.url.clone())
            .bearer_auth(self.api_key.as_ref())
            .json(&body)
            .send()
            .await?;

        info!(
            model = %body.model,
            messages = body.messages.len(),
            status = resp.status().as_u16(),
            took_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "LLM upstream answered"
        );

        if !resp.status().is_success() {
            return Err(upstream_status_error(resp).await);
        }
        let completion: ChatCompletionResponse = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(AssistantResponse::text(completion.into_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_leads_and_max_tokens_defaults() {
        let client = UpstreamClient::with_client(&LlmConfig::default(), reqwest::Client::new());
        let body = client.completion_request(AssistantRequest {
            system: Some("be brief".to_string()),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: None,
        });
        assert_eq!(body.model, "llama-3.3-70b-versatile");
        assert_eq!(body.max_tokens, 1000);
        assert_eq!(body.messages[0], ChatMessage::system("be brief"));
        assert_eq!(body.messages[1], ChatMessage::user("hi"));
    }
}
