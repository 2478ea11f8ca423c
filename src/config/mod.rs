//! # Configuration
//!
//! Layered settings for the composer: built-in defaults, then an optional
//! TOML file, then `COMPOSER__<SECTION>__<KEY>` environment variables.
//!
//! ```toml
//! [cache]
//! name = "templates"
//! policy = "lru"
//! ttl_ms = 30000
//! capacity = 512
//!
//! [storage]
//! template_dir = "config/templates"
//!
//! [retry]
//! max_attempts = 3
//! retryable_codes = ["UNAVAILABLE", "DEADLINE_EXCEEDED"]
//! ```

mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheOptions, EvictionPolicy};
use crate::provider::{parse_code, RetryPolicy};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub retry: RetrySettings,
    pub shutdown: ShutdownSettings,
}

impl ComposerConfig {
    /// Reject settings the runtime types cannot honour
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache.ttl_ms == 0 {
            return Err(ConfigError::invalid("cache.ttl_ms", "must be greater than zero"));
        }
        if self.cache.policy == EvictionPolicy::Lru && self.cache.capacity == 0 {
            return Err(ConfigError::invalid(
                "cache.capacity",
                "must be greater than zero for the lru policy",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                format!("must be at least 1.0, got {}", self.retry.backoff_multiplier),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::invalid(
                "retry.initial_backoff_ms",
                "must not exceed retry.max_backoff_ms",
            ));
        }
        if let Some(unknown) = self
            .retry
            .retryable_codes
            .iter()
            .find(|name| parse_code(name).is_none())
        {
            return Err(ConfigError::invalid(
                "retry.retryable_codes",
                format!("unknown status code {unknown:?}"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub name: String,
    pub policy: EvictionPolicy,
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            name: "templates".to_string(),
            policy: EvictionPolicy::Background,
            ttl_ms: 30_000,
            capacity: 0,
        }
    }
}

impl CacheSettings {
    pub fn to_options(&self) -> CacheOptions {
        let options = CacheOptions::new()
            .name(self.name.clone())
            .ttl(Duration::from_millis(self.ttl_ms));
        match self.policy {
            EvictionPolicy::Background => options.background(),
            EvictionPolicy::Lru => options.lru(self.capacity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub template_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("config/templates"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_codes: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            retryable_codes: vec![
                "UNAVAILABLE".to_string(),
                "DEADLINE_EXCEEDED".to_string(),
                "RESOURCE_EXHAUSTED".to_string(),
            ],
        }
    }
}

impl RetrySettings {
    /// Unknown code names are dropped; [`ComposerConfig::validate`] reports them
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            retryable_codes: self
                .retryable_codes
                .iter()
                .filter_map(|name| parse_code(name))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub timeout_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl ShutdownSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
