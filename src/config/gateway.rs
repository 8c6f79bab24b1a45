use serde::{Deserialize, Serialize};
use url::Url;

use super::deserialize_string_lax;

/// Hosted data backend configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Project base URL; REST lives under `/rest/v1`, auth under `/auth/v1`.
    /// TOML: `gateway.url`. Default: `http://127.0.0.1:54321`.
    #[serde(default = "default_url")]
    pub url: Url,

    /// Public (anon) API key sent as `apikey` on every request.
    /// TOML: `gateway.anon_key`.
    #[serde(default, deserialize_with = "deserialize_string_lax")]
    pub anon_key: String,

    /// Server-sent change feed. Falls back to `<url>/realtime/v1/changes`.
    /// TOML: `gateway.realtime_url`.
    #[serde(default)]
    pub realtime_url: Option<Url>,

    /// Per-request timeout in seconds.
    /// TOML: `gateway.timeout_secs`. Default: `30`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Max reconnect attempts of the change feed before the subscription ends.
    /// TOML: `gateway.realtime_max_retries`. Default: `10`.
    #[serde(default = "default_realtime_max_retries")]
    pub realtime_max_retries: usize,
}

impl GatewayConfig {
    pub fn realtime_url(&self) -> Url {
        self.realtime_url.clone().unwrap_or_else(|| {
            let mut url = self.url.clone();
            url.set_path("/realtime/v1/changes");
            url
        })
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            anon_key: String::new(),
            realtime_url: None,
            timeout_secs: default_timeout_secs(),
            realtime_max_retries: default_realtime_max_retries(),
        }
    }
}

fn default_url() -> Url {
    Url::parse("http://127.0.0.1:54321").expect("default gateway url must be a valid URL")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_realtime_max_retries() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_url_defaults_under_base() {
        let cfg = GatewayConfig::default();
        assert_eq!(
            cfg.realtime_url().as_str(),
            "http://127.0.0.1:54321/realtime/v1/changes"
        );
    }
}
