//! Process configuration: a TOML file with per-field defaults, plus
//! environment overrides for secrets and endpoints.

use crate::sync::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "pairwatch.toml";

pub const ENV_DATABASE_URL: &str = "PAIRWATCH_DATABASE_URL";
pub const ENV_REDIS_URL: &str = "PAIRWATCH_REDIS_URL";
pub const ENV_TELEGRAM_TOKEN: &str = "PAIRWATCH_TELEGRAM_TOKEN";
pub const ENV_ADMIN_CHAT_ID: &str = "PAIRWATCH_ADMIN_CHAT_ID";
pub const ENV_PROVIDER_API_KEY: &str = "PAIRWATCH_PROVIDER_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub provider: ProviderSettings,
    pub telegram: TelegramSettings,
    pub artifacts: ArtifactSettings,
    pub sync: SyncSettings,
    pub renderer: RendererSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/pairwatch".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// Market-data provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
}

fn default_provider_url() -> String {
    pairwatch_core::data::coingecko::DEFAULT_BASE_URL.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_breaker_cooldown_secs() -> u64 {
    30 * 60
}

fn default_breaker_failure_threshold() -> u32 {
    3
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: None,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
        }
    }
}

impl ProviderSettings {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

/// Messaging endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default = "default_telegram_url")]
    pub api_url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Chat that receives sync failure notices
    #[serde(default)]
    pub admin_chat_id: Option<i64>,
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            api_url: default_telegram_url(),
            token: None,
            admin_chat_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Where rendered images are written before upload. System temp dir when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default = "default_chart_days")]
    pub default_chart_days: u32,
}

fn default_ttl_secs() -> u64 {
    600
}

fn default_chart_days() -> u32 {
    7
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            work_dir: None,
            default_chart_days: default_chart_days(),
        }
    }
}

impl ArtifactSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Bulk sync job settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Pause after every provider call.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_interval_hours() -> u64 {
    12
}

fn default_delay_secs() -> u64 {
    10
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            delay_secs: default_delay_secs(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 60 * 60)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// External image renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererSettings {
    #[serde(default = "default_renderer_command")]
    pub command: String,
    /// Arguments placed before the output path.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_renderer_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_renderer_command() -> String {
    "pairwatch-render".to_string()
}

fn default_renderer_timeout_secs() -> u64 {
    60
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            command: default_renderer_command(),
            args: Vec::new(),
            timeout_secs: default_renderer_timeout_secs(),
        }
    }
}

impl RendererSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Read `path`, or `pairwatch.toml` when present, or defaults; then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Override secrets and endpoints from `lookup` (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_DATABASE_URL) {
            self.database.url = url;
        }
        if let Some(url) = get(ENV_REDIS_URL) {
            self.redis.url = url;
        }
        if let Some(token) = get(ENV_TELEGRAM_TOKEN) {
            self.telegram.token = Some(token);
        }
        if let Some(key) = get(ENV_PROVIDER_API_KEY) {
            self.provider.api_key = Some(key);
        }
        if let Some(raw) = get(ENV_ADMIN_CHAT_ID) {
            let chat_id = raw.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
                field: "telegram.admin_chat_id",
                reason: format!("{ENV_ADMIN_CHAT_ID}={raw}: {e}"),
            })?;
            self.telegram.admin_chat_id = Some(chat_id);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "database.max_connections",
                reason: "must be at least 1".into(),
            });
        }
        if self.artifacts.ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "artifacts.ttl_secs",
                reason: "must be positive".into(),
            });
        }
        if self.artifacts.default_chart_days == 0 {
            return Err(ConfigError::Invalid {
                field: "artifacts.default_chart_days",
                reason: "must be positive".into(),
            });
        }
        if self.sync.interval_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.interval_hours",
                reason: "must be positive".into(),
            });
        }
        if self.renderer.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "renderer.command",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}
