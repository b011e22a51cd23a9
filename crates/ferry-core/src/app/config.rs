//! Queue configuration, loadable from TOML.
//!
//! ```toml
//! storage_key = "ferry.operations"
//! default_max_attempts = 3
//! reschedule_interval_ms = 5000
//!
//! [backoff]
//! base_delay_ms = 1000
//! max_delay_ms = 300000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::BackoffPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Key under which the whole queue is persisted.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Used when `enqueue` is called without an explicit `max_attempts`.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Delay before another pass when deliverable work is left over.
    #[serde(default = "default_reschedule_interval_ms")]
    pub reschedule_interval_ms: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_storage_key() -> String {
    "ferry.operations".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_reschedule_interval_ms() -> u64 {
    5_000
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            default_max_attempts: default_max_attempts(),
            reschedule_interval_ms: default_reschedule_interval_ms(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl QueueConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the queue cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::Invalid("storage_key must not be empty".into()));
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::Invalid("default_max_attempts must be at least 1".into()));
        }
        if self.reschedule_interval_ms == 0 {
            return Err(ConfigError::Invalid("reschedule_interval_ms must be positive".into()));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff.max_delay_ms ({}) is below backoff.base_delay_ms ({})",
                self.backoff.max_delay_ms, self.backoff.base_delay_ms
            )));
        }
        Ok(())
    }

    /// `reschedule_interval_ms` as a `Duration`.
    pub fn reschedule_interval(&self) -> Duration {
        Duration::from_millis(self.reschedule_interval_ms)
    }

    /// Backoff policy built from the `[backoff]` table.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff.base_delay_ms),
            Duration::from_millis(self.backoff.max_delay_ms),
        )
    }
}
