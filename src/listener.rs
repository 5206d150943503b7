//! Listener runtime: drives a [`RetryEngine`] from a [`RecordSource`].
//!
//! The engine is registered against the main and retry topics of its policy. Every partition gets
//! its own task, so partitions are handled in parallel while records of one partition are handled
//! strictly in offset order.
//!
//! Per record the worker:
//! 1. waits out the record's backoff (retry topic only; other partitions keep flowing)
//! 2. hands it to the engine
//! 3. commits `offset + 1` once the engine reports it handled
//!
//! A publish failure leaves the offset uncommitted; the same record is redelivered after a pause.
//! Shutdown stops the workers without flushing or cancelling anything: forwarded records already
//! sit on the broker.

use crate::engine::RetryEngine;
use crate::error::SourceError;
use crate::record::{Record, TopicPartition};
use crate::telemetry::TelemetrySink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Pause before redelivering a record whose forward could not be published.
pub const DEFAULT_REDELIVERY_PAUSE: Duration = Duration::from_millis(500);

/// Broker read capability: partitions, offset-addressed fetch, committed offsets.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    /// Partitions of `topic`.
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, SourceError>;

    /// The record at `offset`, waiting for it to arrive if needed.
    async fn fetch(&self, topic: &str, partition: i32, offset: i64) -> Result<Record, SourceError>;

    /// Next offset to read, if the group committed one.
    async fn committed(&self, topic: &str, partition: i32) -> Result<Option<i64>, SourceError>;

    /// Record `next_offset` as the next offset to read.
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64)
        -> Result<(), SourceError>;
}

/// Registers an engine against its consumed topics.
#[derive(Debug)]
pub struct ListenerContainer<S> {
    engine: Arc<RetryEngine<S>>,
    redelivery_pause: Duration,
}

impl<S> ListenerContainer<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    pub fn new(engine: Arc<RetryEngine<S>>) -> Self {
        Self { engine, redelivery_pause: DEFAULT_REDELIVERY_PAUSE }
    }

    pub fn with_redelivery_pause(mut self, pause: Duration) -> Self {
        self.redelivery_pause = pause;
        self
    }

    /// Spawn one worker per partition of the main and retry topics.
    pub async fn start<R>(self, source: Arc<R>) -> Result<ListenerHandle, SourceError>
    where
        R: RecordSource,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::new();
        let topics: Vec<String> =
            self.engine.policy().consumed_topics().iter().map(|t| t.to_string()).collect();

        for topic in topics {
            for partition in source.partitions(&topic).await? {
                let position = TopicPartition::new(topic.clone(), partition);
                let worker = PartitionWorker {
                    engine: self.engine.clone(),
                    source: source.clone(),
                    position: position.clone(),
                    redelivery_pause: self.redelivery_pause,
                    shutdown: shutdown_rx.clone(),
                };
                workers.push(tokio::spawn(worker.run()));
                tracing::debug!(position = %position, "spawned partition worker");
            }
        }

        tracing::info!(workers = workers.len(), "listener started");
        Ok(ListenerHandle { shutdown_tx, workers })
    }
}

/// Running listener. Dropping it also stops the workers, without waiting for them.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Number of partition workers.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop every worker and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "partition worker panicked");
            }
        }
        tracing::info!("listener stopped");
    }
}

struct PartitionWorker<S, R> {
    engine: Arc<RetryEngine<S>>,
    source: Arc<R>,
    position: TopicPartition,
    redelivery_pause: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S, R> PartitionWorker<S, R>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
    R: RecordSource,
{
    async fn run(mut self) {
        let topic = self.position.topic.clone();
        let partition = self.position.partition;
        let mut offset = match self.source.committed(&topic, partition).await {
            Ok(committed) => committed.unwrap_or(0),
            Err(e) => {
                tracing::error!(position = %self.position, error = %e, "cannot resume partition");
                return;
            }
        };

        loop {
            let fetched = tokio::select! {
                _ = self.shutdown.changed() => break,
                fetched = self.source.fetch(&topic, partition, offset) => fetched,
            };
            let record = match fetched {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(position = %self.position, offset, error = %e, "fetch failed");
                    if pause(self.redelivery_pause, &mut self.shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = self.engine.hold(&record) => {}
            }
            let handled = deliver_until_handled(
                &self.engine,
                &record,
                self.redelivery_pause,
                &mut self.shutdown,
            )
            .await;
            if !handled {
                break;
            }

            offset = record.offset + 1;
            if let Err(e) = self.source.commit(&topic, partition, offset).await {
                tracing::warn!(position = %self.position, offset, error = %e, "commit failed");
            }
        }
        tracing::debug!(position = %self.position, "partition worker stopped");
    }
}

/// Hand `record` to `engine` until it is handled, pausing `redelivery_pause` between attempts
/// whose forward could not be published.
///
/// Returns `false` if `shutdown` fired first; the record must then stay uncommitted. Records the
/// engine cannot route are logged and reported handled so the partition keeps moving.
pub async fn deliver_until_handled<S>(
    engine: &RetryEngine<S>,
    record: &Record,
    redelivery_pause: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    loop {
        match engine.handle(record).await {
            Ok(_) => return true,
            Err(e) if e.is_redeliverable() => {
                tracing::warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "redelivering record after pause"
                );
                if pause(redelivery_pause, shutdown).await {
                    return false;
                }
            }
            Err(e) => {
                tracing::error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "skipping record"
                );
                return true;
            }
        }
    }
}

/// Sleep for `duration`. Returns `true` if shutdown was requested meanwhile.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::classify::Classifier;
    use crate::error::BoxError;
    use crate::processor::processor_fn;
    use crate::publish::DeliveryPublisher;
    use crate::record::OutboundRecord;
    use crate::retry::RetryPolicy;
    use crate::telemetry::CountdownSink;

    fn policy() -> RetryPolicy {
        RetryPolicy::builder()
            .main_topic("orders")
            .retry_topic_suffix("-retry")
            .dlq_topic_suffix("-dlt")
            .interval(Duration::from_millis(10))
            .max_attempts(2)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn workers_commit_handled_offsets() {
        let policy = policy();
        let broker = InMemoryBroker::for_policy(&policy, 2);
        let latch = CountdownSink::new(2);
        let engine = RetryEngine::new(
            policy,
            Classifier::default(),
            processor_fn(|p: Vec<u8>| async move { Ok::<_, BoxError>(p) }),
            DeliveryPublisher::new(broker.clone()),
        )
        .with_sink(latch.clone());

        let handle = ListenerContainer::new(Arc::new(engine))
            .start(Arc::new(broker.clone()))
            .await
            .unwrap();
        assert_eq!(handle.workers(), 4);

        broker.append(0, OutboundRecord::new("orders", "a")).unwrap();
        broker.append(1, OutboundRecord::new("orders", "b")).unwrap();
        assert!(latch.wait(Duration::from_secs(2)).await);
        handle.shutdown().await;

        assert_eq!(broker.committed_offset("orders", 0), Some(1));
        assert_eq!(broker.committed_offset("orders", 1), Some(1));
        assert!(broker.records("orders-retry").is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let policy = policy();
        let broker = InMemoryBroker::for_policy(&policy, 1);
        let engine = RetryEngine::new(
            policy,
            Classifier::default(),
            processor_fn(|p: Vec<u8>| async move { Ok::<_, BoxError>(p) }),
            DeliveryPublisher::new(broker.clone()),
        );
        let handle =
            ListenerContainer::new(Arc::new(engine)).start(Arc::new(broker)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("workers exit promptly");
    }
}
