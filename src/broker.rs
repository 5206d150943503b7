//! In-memory broker for tests and demos.
//!
//! Topics are split into partitions; each partition is an append-only log with monotonic offsets
//! starting at 0. Consumers commit the next offset to read, per topic-partition. Publishing can be
//! made to fail on demand to exercise redelivery.
//!
//! Keyed records go to `hash(key) % partitions`; unkeyed records to partition 0.

use crate::clock::{Clock, SystemClock};
use crate::error::{PublishError, SourceError};
use crate::listener::RecordSource;
use crate::publish::Publisher;
use crate::record::{Delivered, OutboundRecord, Record, TopicPartition};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Default)]
struct State {
    topics: HashMap<String, Vec<Vec<Record>>>,
    committed: HashMap<TopicPartition, i64>,
    failing_publishes: usize,
}

struct Inner {
    state: Mutex<State>,
    arrivals: Notify,
    clock: Arc<dyn Clock>,
}

/// Shared handle to an in-memory broker. Clones see the same topics.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let mut topics: Vec<(&String, usize)> =
            state.topics.iter().map(|(name, parts)| (name, parts.len())).collect();
        topics.sort();
        f.debug_struct("InMemoryBroker").field("topics", &topics).finish()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Broker stamping records with `clock` when the producer leaves the timestamp unset.
    pub fn with_clock<C>(clock: C) -> Self
    where
        C: Clock + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                arrivals: Notify::new(),
                clock: Arc::new(clock),
            }),
        }
    }

    /// Broker with the main, retry and dead-letter topics of `policy`, `partitions` each.
    pub fn for_policy(policy: &RetryPolicy, partitions: i32) -> Self {
        let broker = Self::new();
        for topic in [policy.main_topic(), policy.retry_topic(), policy.dlq_topic()] {
            broker.create_topic(topic, partitions);
        }
        broker
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create `topic` with `partitions` partitions (at least one). Existing topics are kept.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let count = usize::try_from(partitions.max(1)).unwrap_or(1);
        self.lock().topics.entry(topic.to_string()).or_insert_with(|| vec![Vec::new(); count]);
    }

    /// Make the next `count` publishes fail with a broker error.
    pub fn fail_next_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    /// Append to an explicit partition, bypassing failure injection.
    pub fn append(
        &self,
        partition: i32,
        record: OutboundRecord,
    ) -> Result<Delivered, PublishError> {
        let delivered = {
            let mut state = self.lock();
            let now = self.inner.clock.now_millis();
            let log = state
                .topics
                .get_mut(&record.topic)
                .ok_or_else(|| PublishError::UnknownTopic { topic: record.topic.clone() })?
                .get_mut(usize::try_from(partition).unwrap_or(usize::MAX))
                .ok_or_else(|| PublishError::Broker {
                    topic: record.topic.clone(),
                    reason: format!("no partition {partition}"),
                })?;
            let offset = log.len() as i64;
            log.push(Record {
                topic: record.topic,
                partition,
                offset,
                key: record.key,
                payload: record.payload,
                headers: record.headers,
                timestamp: Some(record.timestamp.unwrap_or(now)),
            });
            Delivered { partition, offset }
        };
        self.inner.arrivals.notify_waiters();
        Ok(delivered)
    }

    /// Every record of `topic`, ordered by partition then offset.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.lock().topics.get(topic).map(|parts| parts.concat()).unwrap_or_default()
    }

    pub fn partition_records(&self, topic: &str, partition: i32) -> Vec<Record> {
        let state = self.lock();
        usize::try_from(partition)
            .ok()
            .and_then(|p| state.topics.get(topic).and_then(|parts| parts.get(p)))
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset the consumer of `topic`/`partition` will read, if anything was committed.
    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.lock().committed.get(&TopicPartition::new(topic, partition)).copied()
    }

    fn partition_for(key: Option<&[u8]>, partitions: usize) -> i32 {
        match key {
            Some(key) if partitions > 1 => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % partitions as u64) as i32
            }
            _ => 0,
        }
    }

    fn lookup(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<Option<Record>, SourceError> {
        let state = self.lock();
        let log = state
            .topics
            .get(topic)
            .ok_or_else(|| SourceError::UnknownTopic { topic: topic.to_string() })?
            .get(usize::try_from(partition).unwrap_or(usize::MAX))
            .ok_or_else(|| SourceError::UnknownPartition {
                position: TopicPartition::new(topic, partition),
            })?;
        Ok(usize::try_from(offset).ok().and_then(|o| log.get(o)).cloned())
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, record: OutboundRecord) -> Result<Delivered, PublishError> {
        let partition = {
            let mut state = self.lock();
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(PublishError::Broker {
                    topic: record.topic,
                    reason: "injected failure".into(),
                });
            }
            let partitions = state
                .topics
                .get(&record.topic)
                .ok_or_else(|| PublishError::UnknownTopic { topic: record.topic.clone() })?
                .len();
            Self::partition_for(record.key.as_deref(), partitions)
        };
        self.append(partition, record)
    }
}

#[async_trait]
impl RecordSource for InMemoryBroker {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, SourceError> {
        let state = self.lock();
        let parts = state
            .topics
            .get(topic)
            .ok_or_else(|| SourceError::UnknownTopic { topic: topic.to_string() })?;
        Ok((0..parts.len() as i32).collect())
    }

    async fn fetch(&self, topic: &str, partition: i32, offset: i64) -> Result<Record, SourceError> {
        loop {
            let notified = self.inner.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(record) = self.lookup(topic, partition, offset)? {
                return Ok(record);
            }
            notified.await;
        }
    }

    async fn committed(&self, topic: &str, partition: i32) -> Result<Option<i64>, SourceError> {
        Ok(self.committed_offset(topic, partition))
    }

    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<(), SourceError> {
        self.lock().committed.insert(TopicPartition::new(topic, partition), next_offset);
        Ok(())
    }
}
