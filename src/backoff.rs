//! Fixed backoff and the broker-resident backoff scheduler.
//!
//! Attempt semantics follow the retry policy: attempt index `0` is the first delivery (no delay);
//! every retry hop waits the same fixed interval.
//!
//! Scheduling does not park a timer in this process. [`BackoffScheduler::schedule_forward`] stamps
//! the record with its due time (`backoff-due-timestamp`, epoch millis measured from the moment the
//! failure was classified) and publishes it to the retry topic immediately. The retry-topic
//! consumer calls [`BackoffScheduler::hold`] before processing, which waits out whatever is left of
//! the interval. The pending retry therefore lives on the broker and survives a restart; a
//! restarted consumer recomputes the wait from the header.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use redeliver::backoff::FixedBackoff;
//!
//! let backoff = FixedBackoff::new(Duration::from_millis(100));
//! assert_eq!(backoff.delay(0), Duration::ZERO); // first delivery
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(7), Duration::from_millis(100));
//! assert_eq!(backoff.due_at(1_000), 1_100);
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::PublishError;
use crate::lineage::{encode_i64, header, read_i64};
use crate::publish::DeliveryPublisher;
use crate::record::{Delivered, OutboundRecord, Record};
use crate::retry::RetryPolicy;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;

/// Maximum interval accepted; longer values saturate (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Constant delay between successive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    interval: Duration,
}

impl FixedBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval: interval.min(MAX_BACKOFF) }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delay before attempt index `attempt` (0 = first delivery, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.interval
        }
    }

    /// Epoch millis at which a failure observed at `from_millis` may be retried.
    pub fn due_at(&self, from_millis: i64) -> i64 {
        from_millis.saturating_add(millis(self.interval))
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Defers retries through the retry topic instead of an in-process timer.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    backoff: FixedBackoff,
    retry_topic: String,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl BackoffScheduler {
    /// Scheduler using the system clock and tokio timers.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            backoff: *policy.backoff(),
            retry_topic: policy.retry_topic().to_string(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Current wall-clock time according to this scheduler.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Publish `record` right away, stamped so its consumer waits `delay` counted from
    /// `classified_at`. A zero delay clears any stale due stamp.
    pub async fn schedule_forward(
        &self,
        mut record: OutboundRecord,
        delay: Duration,
        classified_at: i64,
        publisher: &DeliveryPublisher,
    ) -> Result<Delivered, PublishError> {
        if delay.is_zero() {
            record.headers.remove(header::BACKOFF_DUE);
        } else {
            let due = classified_at.saturating_add(millis(delay));
            record.headers.set(header::BACKOFF_DUE, encode_i64(due));
        }
        record.timestamp = Some(self.clock.now_millis());
        publisher.send(record).await
    }

    /// When `record` becomes eligible for processing.
    ///
    /// The due stamp wins; a retry-topic record without one falls back to its broker timestamp
    /// plus the interval. Anything else is due immediately.
    pub fn due_at(&self, record: &Record) -> Option<i64> {
        if let Some(due) = read_i64(&record.headers, header::BACKOFF_DUE) {
            return Some(due);
        }
        if record.topic == self.retry_topic {
            return record.timestamp.map(|ts| self.backoff.due_at(ts));
        }
        None
    }

    /// Time left before `record` may be processed.
    pub fn remaining(&self, record: &Record) -> Duration {
        match self.due_at(record) {
            Some(due) => {
                let left = due.saturating_sub(self.clock.now_millis());
                Duration::from_millis(u64::try_from(left).unwrap_or(0)).min(MAX_BACKOFF)
            }
            None => Duration::ZERO,
        }
    }

    /// Wait until `record` is due. Only the calling partition worker is held. Returns the time
    /// waited.
    pub async fn hold(&self, record: &Record) -> Duration {
        let wait = self.remaining(record);
        if !wait.is_zero() {
            tracing::debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                wait_ms = wait.as_millis() as u64,
                "holding retry record until due"
            );
            self.sleeper.sleep(wait).await;
        }
        wait
    }
}
