//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.salesbot/config.json`) and environment.
//! The library itself takes explicit values; only the CLI reads this file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MIN_HEALTH_INTERVAL_SECS: u64 = 1;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// WhatsApp-compatible messaging gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Sales backend (chat, query, health) settings.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Messaging gateway URL, credential, and session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Gateway base URL (default "http://127.0.0.1:8080").
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Value sent in the `apikey` header. Overridden by SALESBOT_GATEWAY_APIKEY env.
    pub api_key: Option<String>,

    /// Instance name requested from the gateway (normalized before use).
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Integration flavor passed on create (default "WHATSAPP-BAILEYS").
    #[serde(default = "default_integration")]
    pub integration: String,

    /// Pause between the delete and create calls, in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Connection-state poll interval, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_instance() -> String {
    "salesbot".to_string()
}

fn default_integration() -> String {
    "WHATSAPP-BAILEYS".to_string()
}

fn default_settle_delay_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            api_key: None,
            instance: default_instance(),
            integration: default_integration(),
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Never shorter than [`MIN_POLL_INTERVAL_MS`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

/// Sales backend URL and health cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Backend base URL (default "http://127.0.0.1:8000"). Overridden by SALESBOT_BACKEND_URL env.
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Seconds between health probes (default 30).
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_health_interval_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

impl BackendConfig {
    /// At least one second.
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(MIN_HEALTH_INTERVAL_SECS))
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the gateway api key: env SALESBOT_GATEWAY_APIKEY overrides config.
pub fn resolve_gateway_api_key(config: &Config) -> Option<String> {
    non_blank_env("SALESBOT_GATEWAY_APIKEY").or_else(|| {
        config
            .gateway
            .api_key
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the backend base URL: env SALESBOT_BACKEND_URL overrides config.
pub fn resolve_backend_url(config: &Config) -> String {
    non_blank_env("SALESBOT_BACKEND_URL").unwrap_or_else(|| config.backend.url.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SALESBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".salesbot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or SALESBOT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
