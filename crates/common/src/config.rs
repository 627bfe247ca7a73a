//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Trigger dispatcher configuration.
    #[serde(default)]
    pub triggers: TriggerConfig,
    /// Friend list configuration.
    #[serde(default)]
    pub friends: FriendsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys and channels.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Trigger dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Milliseconds between ledger polls when nothing wakes the dispatcher.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of ledger events handled per drain.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Deliveries attempted before an event is left for manual inspection.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Processed events older than this are pruned.
    #[serde(default = "default_retention_days")]
    pub processed_retention_days: u32,
}

/// Friend list configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FriendsConfig {
    /// Upper bound for a single page of any relationship list.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
    /// Number of documents carried by one real-time partition snapshot.
    #[serde(default = "default_snapshot_size")]
    pub snapshot_size: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            processed_retention_days: default_retention_days(),
        }
    }
}

impl TriggerConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for FriendsConfig {
    fn default() -> Self {
        Self {
            max_page_size: default_max_page_size(),
            snapshot_size: default_snapshot_size(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "shelfmate".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_batch_size() -> u64 {
    100
}

const fn default_max_attempts() -> i32 {
    8
}

const fn default_retention_days() -> u32 {
    7
}

const fn default_max_page_size() -> u64 {
    100
}

const fn default_snapshot_size() -> u64 {
    100
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `SHELFMATE_ENV`)
    /// 4. Environment variables with `SHELFMATE__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("SHELFMATE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SHELFMATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("SHELFMATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
