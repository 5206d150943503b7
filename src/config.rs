//! Externally supplied retry configuration.
//!
//! Nothing is defaulted except the fatal allow-list, which may be empty. Sources:
//! - JSON text or a JSON file ([`RetryConfig::from_json_str`], [`RetryConfig::from_path`])
//! - environment variables ([`RetryConfig::from_env`]):
//!
//! | Variable | Field |
//! |---|---|
//! | `REDELIVER_MAIN_TOPIC` | `main_topic` |
//! | `REDELIVER_RETRY_TOPIC_SUFFIX` | `retry_topic_suffix` |
//! | `REDELIVER_DLQ_TOPIC_SUFFIX` | `dlq_topic_suffix` |
//! | `REDELIVER_INTERVAL_MS` | `interval_ms` |
//! | `REDELIVER_MAX_ATTEMPTS` | `max_attempts` |
//! | `REDELIVER_FATAL_KINDS` | `fatal_kinds` (comma-separated, optional) |
//!
//! ```rust
//! use redeliver::config::RetryConfig;
//!
//! let config = RetryConfig::from_json_str(r#"{
//!     "main_topic": "orders",
//!     "retry_topic_suffix": "-retry",
//!     "dlq_topic_suffix": "-dlt",
//!     "interval_ms": 100,
//!     "max_attempts": 3,
//!     "fatal_kinds": ["billing.InvoiceRejected"]
//! }"#).unwrap();
//! let policy = config.policy().unwrap();
//! assert_eq!(policy.dlq_topic(), "orders-dlt");
//! assert!(config.classifier().is_fatal_kind("billing.InvoiceRejected"));
//! ```

use crate::classify::Classifier;
use crate::engine::RetryEngine;
use crate::processor::Processor;
use crate::publish::DeliveryPublisher;
use crate::retry::{BuildError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_MAIN_TOPIC: &str = "REDELIVER_MAIN_TOPIC";
pub const ENV_RETRY_TOPIC_SUFFIX: &str = "REDELIVER_RETRY_TOPIC_SUFFIX";
pub const ENV_DLQ_TOPIC_SUFFIX: &str = "REDELIVER_DLQ_TOPIC_SUFFIX";
pub const ENV_INTERVAL_MS: &str = "REDELIVER_INTERVAL_MS";
pub const ENV_MAX_ATTEMPTS: &str = "REDELIVER_MAX_ATTEMPTS";
pub const ENV_FATAL_KINDS: &str = "REDELIVER_FATAL_KINDS";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidVar { name: &'static str, value: String },
    #[error("invalid retry policy: {0}")]
    Policy(#[from] BuildError),
}

/// Retry configuration as supplied by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(alias = "topic")]
    pub main_topic: String,
    #[serde(alias = "retry-topic-suffix")]
    pub retry_topic_suffix: String,
    #[serde(alias = "dlq-topic-suffix")]
    pub dlq_topic_suffix: String,
    #[serde(alias = "interval-ms")]
    pub interval_ms: u64,
    #[serde(alias = "attempts-count")]
    pub max_attempts: u32,
    #[serde(default, alias = "fatal-kinds")]
    pub fatal_kinds: Vec<String>,
}

impl RetryConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&text)
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::MissingVar(name));
        let config = Self {
            main_topic: required(ENV_MAIN_TOPIC)?,
            retry_topic_suffix: required(ENV_RETRY_TOPIC_SUFFIX)?,
            dlq_topic_suffix: required(ENV_DLQ_TOPIC_SUFFIX)?,
            interval_ms: parse_var(ENV_INTERVAL_MS, required(ENV_INTERVAL_MS)?)?,
            max_attempts: parse_var(ENV_MAX_ATTEMPTS, required(ENV_MAX_ATTEMPTS)?)?,
            fatal_kinds: lookup(ENV_FATAL_KINDS)
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|kind| !kind.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values without keeping the policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy().map(|_| ())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        let policy = RetryPolicy::builder()
            .main_topic(self.main_topic.clone())
            .retry_topic_suffix(self.retry_topic_suffix.clone())
            .dlq_topic_suffix(self.dlq_topic_suffix.clone())
            .interval(self.interval())
            .max_attempts(self.max_attempts)
            .build()?;
        Ok(policy)
    }

    /// Classifier whose allow-list is `fatal_kinds`.
    pub fn classifier(&self) -> Classifier {
        Classifier::with_fatal_kinds(self.fatal_kinds.iter().cloned())
    }

    /// Wire an engine from this configuration.
    pub fn engine<P>(
        &self,
        processor: P,
        publisher: DeliveryPublisher,
    ) -> Result<RetryEngine, ConfigError>
    where
        P: Processor + 'static,
    {
        Ok(RetryEngine::new(self.policy()?, self.classifier(), processor, publisher))
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar { name, value })
}
