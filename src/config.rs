use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Timed calls one record can make: tracker read and write, reply, error reply.
const CALLS_PER_RECORD: i64 = 4;

/// Read consistency requested from the user store for the debounce lookup.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadConsistency {
    #[default]
    Eventual,
    Strong,
}

impl std::fmt::Display for ReadConsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadConsistency::Eventual => write!(f, "eventual"),
            ReadConsistency::Strong => write!(f, "strong"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Expected value of `X-Telegram-Bot-Api-Secret-Token`. Empty disables the check.
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Values substituted into translated texts.
#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_bot_description")]
    pub description: String,
    #[serde(default = "default_bot_instructions")]
    pub instructions: String,
    #[serde(default = "default_language")]
    pub default_language: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    #[serde(default = "default_debounce_window_secs")]
    pub debounce_window_secs: i64,
    #[serde(default)]
    pub read_consistency: ReadConsistency,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_bot_name() -> String {
    "tg-relay".to_string()
}

fn default_bot_description() -> String {
    "everyday questions".to_string()
}

fn default_bot_instructions() -> String {
    "Send a command or just write a message.".to_string()
}

pub fn default_language() -> String {
    "en".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_visibility_timeout_secs() -> i64 {
    600
}

pub fn default_debounce_window_secs() -> i64 {
    86_400
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tg-relay.db")
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            description: default_bot_description(),
            instructions: default_bot_instructions(),
            default_language: default_language(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            webhook_path: default_webhook_path(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            debounce_window_secs: default_debounce_window_secs(),
            read_consistency: ReadConsistency::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;

        if config.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token must be set");
        }
        if config.queue.batch_size == 0 {
            anyhow::bail!("queue.batch_size must be at least 1");
        }

        let floor = config.min_visibility_timeout_secs();
        if config.queue.visibility_timeout_secs < floor {
            warn!(
                "queue.visibility_timeout_secs = {} is shorter than a worst-case batch, using {}",
                config.queue.visibility_timeout_secs, floor
            );
            config.queue.visibility_timeout_secs = floor;
        }

        Ok(config)
    }

    /// Claim lifetime that outlasts a batch whose every call hits the HTTP
    /// timeout, so a slow batch is never redelivered while still running.
    pub fn min_visibility_timeout_secs(&self) -> i64 {
        let per_call = i64::try_from(self.http.timeout_secs).unwrap_or(i64::MAX);
        let batch = i64::try_from(self.queue.batch_size).unwrap_or(i64::MAX);
        batch
            .saturating_mul(per_call)
            .saturating_mul(CALLS_PER_RECORD)
    }
}
