//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use super::economy::{BumpConfig, EconomyConfig};
use super::leveling::LevelingConfig;
use super::review::ReviewConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bot identity.
    #[serde(default)]
    pub bot: BotConfig,
    /// Platform REST credentials.
    pub discord: DiscordConfig,
    /// Bridge/metrics listener.
    #[serde(default)]
    pub http: HttpConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
    /// Log output configuration.
    #[serde(default)]
    pub log: LogConfig,
    /// Defaults for guilds without stored leveling settings.
    #[serde(default)]
    pub leveling: LevelingConfig,
    /// Review session settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// Currency display settings.
    #[serde(default)]
    pub economy: EconomyConfig,
    /// Bump tracker settings.
    #[serde(default)]
    pub bump: BumpConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Database path, defaulting to `guildkeeper.db`.
    pub fn database_path(&self) -> &str {
        self.database
            .as_ref()
            .map(|d| d.path.as_str())
            .unwrap_or("guildkeeper.db")
    }
}

/// Bot identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Display name used in log lines and notifications.
    #[serde(default = "default_bot_name")]
    pub name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
        }
    }
}

fn default_bot_name() -> String {
    "guildkeeper".to_string()
}

/// Platform REST configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token (sent as `Authorization: Bot <token>`).
    pub token: String,
    /// REST API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Category under which review ticket channels are created.
    #[serde(default)]
    pub ticket_category_id: Option<u64>,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

/// HTTP listener for the gateway bridge and Prometheus scraping.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Listen address (default: 127.0.0.1:8080).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Shared secret expected in the `x-bridge-secret` header of `POST /events`.
    #[serde(default)]
    pub bridge_secret: Option<String>,
    /// Expose `/metrics` (default: true).
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            bridge_secret: None,
            metrics: true,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

pub(super) fn default_true() -> bool {
    true
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `:memory:`.
    pub path: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Log configuration. `RUST_LOG` overrides `level`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
