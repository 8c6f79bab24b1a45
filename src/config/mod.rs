mod basic;
mod gateway;
mod llm;
mod sync;

pub use basic::BasicConfig;
pub use gateway::GatewayConfig;
pub use llm::LlmConfig;
pub use sync::{HabitsConfig, NotificationsConfig, RemindersConfig};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Application configuration managed by Figment.
///
/// Sources, later wins: built-in defaults, `config.toml` when present, then
/// `PLANPILOT_`-prefixed environment variables with `__` separating tables
/// (`PLANPILOT_LLM__API_KEY` sets `llm.api_key`).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Listener, logging and inbound key (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Hosted data backend (see `gateway` table in config.toml).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Chat completion upstream (see `llm` table in config.toml).
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub reminders: RemindersConfig,

    #[serde(default)]
    pub habits: HabitsConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "PLANPILOT_";

impl Config {
    /// Builds a Figment that merges defaults, a config TOML file and the environment.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads configuration from every source.
    ///
    /// Missing API keys are not rejected here; calls needing them fail when made.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment().extract().map_err(Box::new)
    }
}

/// Accepts a TOML string or number for key-like fields.
pub(crate) fn deserialize_string_lax<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;

    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(serde::de::Error::custom("expected a string or a number")),
    }
}
