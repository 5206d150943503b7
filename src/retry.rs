//! Retry policy: topic naming, attempt budget, fixed interval.
//!
//! Semantics:
//! - `max_attempts` counts total processing attempts (first delivery + retries).
//! - All retry hops share one retry topic, `{main}{retry_suffix}`; there is no per-attempt fan-out.
//! - Retry-exhausted and fatal records land on `{main}{dlq_suffix}`.
//! - The interval is fixed; it applies to every retry hop.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use redeliver::{Destination, RetryPolicy};
//!
//! let policy = RetryPolicy::builder()
//!     .main_topic("orders")
//!     .retry_topic_suffix("-retry")
//!     .dlq_topic_suffix("-dlt")
//!     .interval(Duration::from_millis(500))
//!     .max_attempts(3)
//!     .build()
//!     .unwrap();
//! assert_eq!(policy.topic_for(Destination::Retry), "orders-retry");
//! assert_eq!(policy.destination_of("orders-dlt"), Some(Destination::DeadLetter));
//! ```

use crate::backoff::{FixedBackoff, MAX_BACKOFF};
use std::fmt;
use std::time::Duration;

/// One of the three topics a logical message can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Main,
    Retry,
    DeadLetter,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Retry => f.write_str("retry"),
            Self::DeadLetter => f.write_str("dead-letter"),
        }
    }
}

/// Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    main_topic: String,
    retry_topic: String,
    dlq_topic: String,
    backoff: FixedBackoff,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn main_topic(&self) -> &str {
        &self.main_topic
    }

    pub fn retry_topic(&self) -> &str {
        &self.retry_topic
    }

    pub fn dlq_topic(&self) -> &str {
        &self.dlq_topic
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.backoff.interval()
    }

    pub fn backoff(&self) -> &FixedBackoff {
        &self.backoff
    }

    pub fn topic_for(&self, destination: Destination) -> &str {
        match destination {
            Destination::Main => &self.main_topic,
            Destination::Retry => &self.retry_topic,
            Destination::DeadLetter => &self.dlq_topic,
        }
    }

    /// Which destination a topic name corresponds to, if any.
    pub fn destination_of(&self, topic: &str) -> Option<Destination> {
        if topic == self.main_topic {
            Some(Destination::Main)
        } else if topic == self.retry_topic {
            Some(Destination::Retry)
        } else if topic == self.dlq_topic {
            Some(Destination::DeadLetter)
        } else {
            None
        }
    }

    /// Topics a listener registers against: the main topic and the retry topic.
    pub fn consumed_topics(&self) -> [&str; 2] {
        [&self.main_topic, &self.retry_topic]
    }
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(u32),
    /// A required field was never set.
    #[error("{0} is required")]
    Missing(&'static str),
    /// A topic name or suffix was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// Retry and dead-letter suffixes would name the same topic.
    #[error("retry and dead-letter suffixes must differ (both {0:?})")]
    SuffixClash(String),
    /// The interval exceeds [`MAX_BACKOFF`].
    #[error("interval {0:?} exceeds the maximum of {max:?}", max = MAX_BACKOFF)]
    IntervalTooLong(Duration),
}

/// Builder for [`RetryPolicy`]. Every field is required; nothing is defaulted.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    main_topic: Option<String>,
    retry_topic_suffix: Option<String>,
    dlq_topic_suffix: Option<String>,
    interval: Option<Duration>,
    max_attempts: Option<u32>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn main_topic(mut self, topic: impl Into<String>) -> Self {
        self.main_topic = Some(topic.into());
        self
    }

    pub fn retry_topic_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.retry_topic_suffix = Some(suffix.into());
        self
    }

    pub fn dlq_topic_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dlq_topic_suffix = Some(suffix.into());
        self
    }

    /// Fixed delay between a failure and the next attempt. At most [`MAX_BACKOFF`].
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Build the policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        let main_topic = non_empty(self.main_topic, "main_topic")?;
        let retry_suffix = non_empty(self.retry_topic_suffix, "retry_topic_suffix")?;
        let dlq_suffix = non_empty(self.dlq_topic_suffix, "dlq_topic_suffix")?;
        let interval = self.interval.ok_or(BuildError::Missing("interval"))?;
        if interval > MAX_BACKOFF {
            return Err(BuildError::IntervalTooLong(interval));
        }
        let max_attempts = self.max_attempts.ok_or(BuildError::Missing("max_attempts"))?;
        if max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        if retry_suffix == dlq_suffix {
            return Err(BuildError::SuffixClash(retry_suffix));
        }
        Ok(RetryPolicy {
            retry_topic: format!("{main_topic}{retry_suffix}"),
            dlq_topic: format!("{main_topic}{dlq_suffix}"),
            main_topic,
            backoff: FixedBackoff::new(interval),
            max_attempts,
        })
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, BuildError> {
    match value {
        None => Err(BuildError::Missing(field)),
        Some(v) if v.is_empty() => Err(BuildError::Empty(field)),
        Some(v) => Ok(v),
    }
}
