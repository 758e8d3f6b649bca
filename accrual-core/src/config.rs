use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub poller: PollerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    /// Accrual system address, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    /// Per-request deadline
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollerConfig {
    pub interval_ms: u64,
    /// Max concurrent provider requests
    pub workers: usize,
    pub queue_capacity: usize,
    pub drain_timeout_secs: u64,
    /// Back-off used when a 429 carries no usable Retry-After
    pub default_retry_after_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            workers: 4,
            queue_capacity: 1024,
            drain_timeout_secs: 5,
            default_retry_after_secs: 60,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let poller = PollerConfig::default();

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("provider.base_url", "http://127.0.0.1:8080")?
            .set_default("provider.timeout_secs", 5)?
            .set_default("poller.interval_ms", poller.interval_ms)?
            .set_default("poller.workers", poller.workers as u64)?
            .set_default("poller.queue_capacity", poller.queue_capacity as u64)?
            .set_default("poller.drain_timeout_secs", poller.drain_timeout_secs)?
            .set_default("poller.default_retry_after_secs", poller.default_retry_after_secs)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(Environment::with_prefix("ACCRUAL").separator("__"));

        // Well-known variables of the deployment environment
        if let Ok(db_url) = env::var("DATABASE_URI").or_else(|_| env::var("DATABASE_URL")) {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(address) = env::var("ACCRUAL_SYSTEM_ADDRESS") {
            builder = builder.set_override("provider.base_url", address)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(Error::Config("Database URL is required".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(Error::Config("Database pool needs at least one connection".to_string()));
        }

        if !(self.provider.base_url.starts_with("http://")
            || self.provider.base_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "Accrual provider URL must be http(s): {}",
                self.provider.base_url
            )));
        }

        if self.provider.timeout_secs == 0 {
            return Err(Error::Config("Provider timeout cannot be 0".to_string()));
        }

        if self.poller.interval_ms == 0 {
            return Err(Error::Config("Poll interval cannot be 0".to_string()));
        }

        if self.poller.workers == 0 || self.poller.queue_capacity == 0 {
            return Err(Error::Config(
                "Poller needs at least one worker and a non-empty queue".to_string(),
            ));
        }

        Ok(())
    }
}
