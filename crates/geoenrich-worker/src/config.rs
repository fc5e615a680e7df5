//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::storage::config::StorageConfig;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/geoenrich";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_PLACES_BASE_URL: &str = "https://maps.googleapis.com/maps/api";
pub const DEFAULT_PLACES_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PLACES_MAX_RETRIES: u32 = 2;

/// Sustained lookup rate shared by every worker and every job.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 50;
pub const DEFAULT_BURST: u32 = 50;

/// Proximity search radius around the geocoded point.
pub const DEFAULT_SEARCH_RADIUS_METERS: u32 = 25;

pub const DEFAULT_POOL_SIZE: usize = 50;
pub const DEFAULT_FEED_CAPACITY: usize = 100;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Unacknowledged messages become visible again after this long.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8080;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub places: PlacesConfig,
    pub pipeline: PipelineConfig,
    pub queue: QueueConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Places lookup client and rate limit settings
#[derive(Clone, Serialize, Deserialize)]
pub struct PlacesConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Transport retries per request; the resolver itself never retries.
    pub max_retries: u32,
    pub requests_per_second: u32,
    pub burst: u32,
    pub search_radius_meters: u32,
}

// Keep the API key out of logs.
impl std::fmt::Debug for PlacesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacesConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("requests_per_second", &self.requests_per_second)
            .field("burst", &self.burst)
            .field("search_radius_meters", &self.search_radius_meters)
            .finish()
    }
}

impl PlacesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-job pipeline sizing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub pool_size: usize,
    pub task_feed_capacity: usize,
    pub result_feed_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    pub max_concurrent_jobs: usize,
    pub shutdown_timeout_secs: u64,
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read every section from the environment without validating.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL.to_string())?,
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )?,
            },
            storage: StorageConfig::from_env()?,
            places: PlacesConfig {
                api_key: env_opt("PLACES_API_KEY").ok_or(ConfigError::Missing("PLACES_API_KEY"))?,
                base_url: env_or("PLACES_BASE_URL", DEFAULT_PLACES_BASE_URL.to_string())?,
                timeout_secs: env_or("PLACES_TIMEOUT_SECS", DEFAULT_PLACES_TIMEOUT_SECS)?,
                max_retries: env_or("PLACES_MAX_RETRIES", DEFAULT_PLACES_MAX_RETRIES)?,
                requests_per_second: env_or(
                    "PLACES_REQUESTS_PER_SECOND",
                    DEFAULT_REQUESTS_PER_SECOND,
                )?,
                burst: env_or("PLACES_BURST", DEFAULT_BURST)?,
                search_radius_meters: env_or(
                    "PLACES_SEARCH_RADIUS_METERS",
                    DEFAULT_SEARCH_RADIUS_METERS,
                )?,
            },
            pipeline: PipelineConfig {
                pool_size: env_or("PIPELINE_POOL_SIZE", DEFAULT_POOL_SIZE)?,
                task_feed_capacity: env_or("PIPELINE_TASK_FEED_CAPACITY", DEFAULT_FEED_CAPACITY)?,
                result_feed_capacity: env_or(
                    "PIPELINE_RESULT_FEED_CAPACITY",
                    DEFAULT_FEED_CAPACITY,
                )?,
            },
            queue: QueueConfig {
                poll_interval_ms: env_or("QUEUE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
                visibility_timeout_secs: env_or(
                    "QUEUE_VISIBILITY_TIMEOUT_SECS",
                    DEFAULT_VISIBILITY_TIMEOUT_SECS,
                )?,
                max_concurrent_jobs: env_or(
                    "QUEUE_MAX_CONCURRENT_JOBS",
                    DEFAULT_MAX_CONCURRENT_JOBS,
                )?,
                shutdown_timeout_secs: env_or(
                    "SHUTDOWN_TIMEOUT_SECS",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            api: ApiConfig {
                enabled: env_or("API_ENABLED", true)?,
                host: env_or("API_HOST", DEFAULT_API_HOST.to_string())?,
                port: env_or("API_PORT", DEFAULT_API_PORT)?,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(invalid("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(invalid("Database max_connections must be greater than 0"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Validation(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        self.storage.validate()?;

        if self.places.api_key.trim().is_empty() {
            return Err(invalid("PLACES_API_KEY cannot be empty"));
        }

        if self.places.requests_per_second == 0 || self.places.burst == 0 {
            return Err(invalid("Lookup rate and burst must be greater than 0"));
        }

        if self.places.search_radius_meters == 0 {
            return Err(invalid("Search radius must be greater than 0"));
        }

        self.pipeline.validate()?;

        if self.queue.max_concurrent_jobs == 0 {
            return Err(invalid("QUEUE_MAX_CONCURRENT_JOBS must be greater than 0"));
        }

        if self.api.enabled && self.api.port == 0 {
            return Err(invalid("API port must be greater than 0"));
        }

        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(invalid("Pipeline pool size must be greater than 0"));
        }
        if self.task_feed_capacity == 0 || self.result_feed_capacity == 0 {
            return Err(invalid("Pipeline feed capacities must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            task_feed_capacity: DEFAULT_FEED_CAPACITY,
            result_feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            storage: StorageConfig::default(),
            places: PlacesConfig {
                api_key: String::new(),
                base_url: DEFAULT_PLACES_BASE_URL.to_string(),
                timeout_secs: DEFAULT_PLACES_TIMEOUT_SECS,
                max_retries: DEFAULT_PLACES_MAX_RETRIES,
                requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
                burst: DEFAULT_BURST,
                search_radius_meters: DEFAULT_SEARCH_RADIUS_METERS,
            },
            pipeline: PipelineConfig::default(),
            queue: QueueConfig {
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
                visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
                max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            api: ApiConfig {
                enabled: true,
                host: DEFAULT_API_HOST.to_string(),
                port: DEFAULT_API_PORT,
            },
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation(message.to_string())
}

/// Non-empty value of `key`, if set.
pub(crate) fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `key` when set, falling back to `default` when unset.
pub(crate) fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
