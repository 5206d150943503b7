//! Retry router: decides where a record goes after one processing attempt.
//!
//! Rules, in precedence order:
//! 1. success → [`Route::Ack`], nothing is forwarded
//! 2. fatal failure → dead letter, whatever the attempt number
//! 3. retryable failure with `attempt < max_attempts` → retry topic after the fixed interval
//! 4. retryable failure with `attempt >= max_attempts` → dead letter, no delay
//!
//! Fatal beats attempt bookkeeping; exhaustion beats "would otherwise retry".
//!
//! Attempt numbering of the produced hop:
//! - retry and fatal hops carry `attempt + 1`
//! - an exhausted hop carries the final attempt number (`max_attempts`) as its marker
//!
//! Stateless: the same inputs always produce the same route.

use crate::classify::ErrorClass;
use crate::lineage::Lineage;
use crate::retry::{Destination, RetryPolicy};
use std::fmt;
use std::time::Duration;

/// Result of one processing attempt, as far as routing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Succeeded,
    Failed(ErrorClass),
}

/// Why a record is being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopReason {
    /// Retryable failure with attempts left.
    Retry,
    /// Fatal failure; retries skipped.
    Fatal,
    /// Retryable failure on the last allowed attempt.
    Exhausted,
}

impl fmt::Display for HopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => f.write_str("retry"),
            Self::Fatal => f.write_str("fatal"),
            Self::Exhausted => f.write_str("retries exhausted"),
        }
    }
}

/// A forwarding decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    /// Destination the failed record came from.
    pub from: Destination,
    pub destination: Destination,
    /// How long the next consumer must wait before processing.
    pub delay: Duration,
    /// Lineage of the forwarded record.
    pub lineage: Lineage,
    pub reason: HopReason,
}

/// What to do with an inbound record after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Processing succeeded; acknowledge and stop.
    Ack,
    /// Forward, then acknowledge once the forward is published.
    Forward(Hop),
}

impl Route {
    pub fn hop(&self) -> Option<&Hop> {
        match self {
            Self::Ack => None,
            Self::Forward(hop) => Some(hop),
        }
    }
}

/// Route one attempt. `lineage` is the lineage of the record that was just processed.
pub fn route(
    current: Destination,
    lineage: &Lineage,
    result: AttemptResult,
    policy: &RetryPolicy,
) -> Route {
    let class = match result {
        AttemptResult::Succeeded => return Route::Ack,
        AttemptResult::Failed(class) => class,
    };
    let attempt = lineage.attempt.max(1);
    let (destination, delay, next_attempt, reason) = match class {
        ErrorClass::Fatal => {
            (Destination::DeadLetter, Duration::ZERO, attempt.saturating_add(1), HopReason::Fatal)
        }
        ErrorClass::Retryable if attempt < policy.max_attempts() => (
            Destination::Retry,
            policy.backoff().delay(attempt as usize),
            attempt + 1,
            HopReason::Retry,
        ),
        ErrorClass::Retryable => {
            (Destination::DeadLetter, Duration::ZERO, attempt, HopReason::Exhausted)
        }
    };
    Route::Forward(Hop {
        from: current,
        destination,
        delay,
        lineage: lineage.with_attempt(next_attempt),
        reason,
    })
}
