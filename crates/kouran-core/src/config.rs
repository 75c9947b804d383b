//! KouranBot configuration system.
//!
//! Loaded from `~/.kouran/config.toml` when present, then overridden by the
//! environment variables the bot has always honoured (`TELEGRAM_BOT_TOKEN`,
//! `DATABASE_PATH`, `POLLING_INTERVAL`, `JSON_URL`, `CEB_URL`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KouranError, Result};

pub const DEFAULT_CEB_URL: &str = "https://ceb.mu/customer-corner/power-outage-information";
pub const DEFAULT_FEED_URL: &str = "https://raw.githubusercontent.com/MrSunshyne/mauritius-dataset-electricity/main/data/power-outages.latest.json";
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KouranConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl KouranConfig {
    /// Load config from the default path, falling back to defaults, then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific path. Environment overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KouranError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| KouranError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply environment overrides through a lookup function (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(path) = lookup("DATABASE_PATH").filter(|v| !v.is_empty()) {
            self.store.path = path;
        }
        if let Some(url) = lookup("JSON_URL").filter(|v| !v.is_empty()) {
            self.sources.feed_url = url;
        }
        if let Some(url) = lookup("CEB_URL").filter(|v| !v.is_empty()) {
            self.sources.ceb_url = url;
        }
        if let Some(raw) = lookup("POLLING_INTERVAL") {
            match raw.trim().parse::<u64>() {
                Ok(mins) => self.monitor.polling_interval_mins = mins,
                Err(_) => tracing::warn!("⚠️ Ignoring invalid POLLING_INTERVAL={raw}"),
            }
        }
    }

    /// Check the settings a delivering process cannot run without.
    pub fn validate(&self, require_token: bool) -> Result<()> {
        if require_token && self.telegram.bot_token.trim().is_empty() {
            return Err(KouranError::Config(
                "telegram.bot_token is not set (or TELEGRAM_BOT_TOKEN)".into(),
            ));
        }
        if self.monitor.polling_interval_mins == 0 {
            return Err(KouranError::Config(
                "monitor.polling_interval_mins must be > 0".into(),
            ));
        }
        if self.dispatch.max_per_second == 0 {
            return Err(KouranError::Config(
                "dispatch.max_per_second must be > 0".into(),
            ));
        }
        if !self.sources.ceb_enabled && !self.sources.feed_enabled {
            return Err(KouranError::Config("no outage source enabled".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the KouranBot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kouran")
    }
}

/// Telegram delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
}

fn default_telegram_api() -> String { DEFAULT_TELEGRAM_API.into() }
fn default_telegram_timeout() -> u64 { 10 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api(),
            timeout_secs: default_telegram_timeout(),
        }
    }
}

/// Upstream outage sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "bool_true")]
    pub ceb_enabled: bool,
    #[serde(default = "default_ceb_url")]
    pub ceb_url: String,
    #[serde(default = "bool_true")]
    pub feed_enabled: bool,
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

fn bool_true() -> bool { true }
fn default_ceb_url() -> String { DEFAULT_CEB_URL.into() }
fn default_feed_url() -> String { DEFAULT_FEED_URL.into() }
fn default_source_timeout() -> u64 { 30 }

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            ceb_enabled: true,
            ceb_url: default_ceb_url(),
            feed_enabled: true,
            feed_url: default_feed_url(),
            timeout_secs: default_source_timeout(),
        }
    }
}

/// Scheduling and change-detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval_mins: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// Attempts per storage operation before a record is reported as failed.
    #[serde(default = "default_store_retries")]
    pub store_retries: u32,
}

fn default_polling_interval() -> u64 { 15 }
fn default_initial_delay() -> u64 { 30 }
fn default_store_retries() -> u32 { 3 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval_mins: default_polling_interval(),
            initial_delay_secs: default_initial_delay(),
            store_retries: default_store_retries(),
        }
    }
}

/// Notification fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Outbound ceiling; attempts are spaced by `1s / max_per_second`.
    #[serde(default = "default_max_per_second")]
    pub max_per_second: u32,
    #[serde(default = "default_language")]
    pub default_language: String,
}

fn default_max_per_second() -> u32 { 20 }
fn default_language() -> String { "en".into() }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_per_second: default_max_per_second(),
            default_language: default_language(),
        }
    }
}

/// SQLite store location and seed data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_localities_file")]
    pub localities_file: String,
}

fn default_store_path() -> String { "~/.kouran/kouran.db".into() }
fn default_localities_file() -> String { "districts_localities.json".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            localities_file: default_localities_file(),
        }
    }
}

impl StoreConfig {
    /// Store path with `~` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}
