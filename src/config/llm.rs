use serde::{Deserialize, Serialize};
use url::Url;

use super::deserialize_string_lax;

/// Chat completion upstream configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// OpenAI-compatible `chat/completions` endpoint.
    /// TOML: `llm.upstream_url`. Default: Groq.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: Url,

    /// Bearer key for the upstream. Not validated at startup.
    /// TOML: `llm.api_key`.
    #[serde(default, deserialize_with = "deserialize_string_lax")]
    pub api_key: String,

    /// TOML: `llm.model`. Default: `llama-3.3-70b-versatile`.
    #[serde(default = "default_model")]
    pub model: String,

    /// Used when a request omits `max_tokens`.
    /// TOML: `llm.max_tokens`. Default: `1000`.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Upstream requests per second admitted by the service; excess gets 429.
    /// TOML: `llm.rps`. Default: `5`.
    #[serde(default = "default_rps")]
    pub rps: u32,

    /// Upstream request timeout in seconds.
    /// TOML: `llm.timeout_secs`. Default: `60`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional upstream HTTP proxy, e.g. `http://127.0.0.1:1080`.
    /// TOML: `llm.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            rps: default_rps(),
            timeout_secs: default_timeout_secs(),
            proxy: None,
        }
    }
}

fn default_upstream_url() -> Url {
    Url::parse("https://api.groq.com/openai/v1/chat/completions")
        .expect("default upstream_url must be a valid URL")
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_rps() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    60
}
