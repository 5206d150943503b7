use crate::headers::record_from_message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::{Offset, TopicPartitionList};
use redeliver::listener::{deliver_until_handled, DEFAULT_REDELIVERY_PAUSE};
use redeliver::telemetry::TelemetrySink;
use redeliver::{Record, RetryEngine, TopicPartition};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

/// Records queued per partition worker before the partition is paused.
const PARTITION_BUFFER: usize = 64;

/// How often backlogs of paused partitions are moved into their workers' queues.
const BACKLOG_DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Consumer settings the listener relies on: manual commits, start from the beginning of a topic
/// the group has never read.
pub fn consumer_config(brokers: &str, group_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");
    config
}

/// Runs a [`RetryEngine`] from a `StreamConsumer` subscribed to its main and retry topics.
///
/// One poll loop dispatches records to a worker per topic-partition. Workers hold retry-topic
/// records until their backoff is due, hand them to the engine, and commit `offset + 1` once the
/// engine reports them handled. A record whose forward failed is redelivered after a pause and
/// never committed before it is handled.
///
/// The poll loop never waits on a worker. When a worker's queue is full, further records of that
/// partition go to a backlog and the partition is paused on the consumer until the backlog drains,
/// so a partition held by backoff does not stall the others.
pub struct KafkaListener<S> {
    consumer: Arc<StreamConsumer>,
    engine: Arc<RetryEngine<S>>,
    redelivery_pause: Duration,
}

impl<S> std::fmt::Debug for KafkaListener<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaListener")
            .field("redelivery_pause", &self.redelivery_pause)
            .finish_non_exhaustive()
    }
}

impl<S> KafkaListener<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Subscribe `consumer` to the topics `engine` consumes.
    pub fn new(consumer: StreamConsumer, engine: Arc<RetryEngine<S>>) -> KafkaResult<Self> {
        consumer.subscribe(&engine.policy().consumed_topics())?;
        Ok(Self {
            consumer: Arc::new(consumer),
            engine,
            redelivery_pause: DEFAULT_REDELIVERY_PAUSE,
        })
    }

    pub fn with_redelivery_pause(mut self, pause: Duration) -> Self {
        self.redelivery_pause = pause;
        self
    }

    /// Poll until `shutdown` flips (or its sender is dropped), then wait for the workers.
    ///
    /// Nothing is flushed on the way out: forwarded records already sit on the broker, and
    /// uncommitted records are read again by the next member of the group.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut workers: HashMap<TopicPartition, PartitionDispatch> = HashMap::new();
        let mut tasks = Vec::new();
        let mut drain = tokio::time::interval(BACKLOG_DRAIN_INTERVAL);

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                _ = drain.tick() => {
                    self.drain_backlogs(&mut workers);
                    continue;
                }
                received = self.consumer.recv() => received.map(|m| record_from_message(&m)),
            };
            let record = match received {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "KafkaListener: receive failed");
                    continue;
                }
            };

            let position = record.topic_partition();
            let dispatch = workers.entry(position.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(PARTITION_BUFFER);
                tasks.push(tokio::spawn(run_partition(
                    self.engine.clone(),
                    self.consumer.clone(),
                    rx,
                    shutdown.clone(),
                    self.redelivery_pause,
                )));
                tracing::debug!(position = %position, "spawned partition worker");
                PartitionDispatch::new(tx)
            });
            match dispatch.offer(record) {
                Ok(true) => self.set_paused(&position, true),
                Ok(false) => {}
                Err(WorkerGone) => {
                    tracing::warn!(
                        position = %position,
                        "partition worker gone; record not committed"
                    );
                    workers.remove(&position);
                }
            }
        }

        drop(workers);
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "partition worker panicked");
            }
        }
        tracing::info!("KafkaListener stopped");
    }

    fn drain_backlogs(&self, workers: &mut HashMap<TopicPartition, PartitionDispatch>) {
        let mut gone = Vec::new();
        for (position, dispatch) in workers.iter_mut() {
            match dispatch.drain() {
                Ok(true) => self.set_paused(position, false),
                Ok(false) => {}
                Err(WorkerGone) => gone.push(position.clone()),
            }
        }
        for position in gone {
            tracing::warn!(position = %position, "partition worker gone; backlog not committed");
            workers.remove(&position);
        }
    }

    fn set_paused(&self, position: &TopicPartition, paused: bool) {
        let mut partitions = TopicPartitionList::new();
        partitions.add_partition(&position.topic, position.partition);
        let result = if paused {
            self.consumer.pause(&partitions)
        } else {
            self.consumer.resume(&partitions)
        };
        match result {
            Ok(()) => tracing::debug!(position = %position, paused, "partition fetch toggled"),
            Err(e) => tracing::warn!(position = %position, error = %e, "pause/resume failed"),
        }
    }
}

/// The partition worker's queue is closed.
#[derive(Debug, PartialEq, Eq)]
struct WorkerGone;

/// Feeds one partition worker without ever waiting on it.
///
/// Records that do not fit the worker's queue wait in an ordered backlog. While the backlog is
/// non-empty every new record of the partition joins it, so offset order is kept.
#[derive(Debug)]
struct PartitionDispatch {
    sender: mpsc::Sender<Record>,
    backlog: VecDeque<Record>,
    paused: bool,
}

impl PartitionDispatch {
    fn new(sender: mpsc::Sender<Record>) -> Self {
        Self { sender, backlog: VecDeque::new(), paused: false }
    }

    /// Queue `record`. Returns `true` when the partition has to be paused.
    fn offer(&mut self, record: Record) -> Result<bool, WorkerGone> {
        if self.backlog.is_empty() {
            match self.sender.try_send(record) {
                Ok(()) => return Ok(false),
                Err(TrySendError::Full(record)) => self.backlog.push_back(record),
                Err(TrySendError::Closed(_)) => return Err(WorkerGone),
            }
        } else {
            self.backlog.push_back(record);
        }
        let pause = !self.paused;
        self.paused = true;
        Ok(pause)
    }

    /// Move as much backlog as fits into the worker's queue. Returns `true` when the backlog
    /// emptied and the partition can be resumed.
    fn drain(&mut self) -> Result<bool, WorkerGone> {
        while let Some(record) = self.backlog.pop_front() {
            match self.sender.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    self.backlog.push_front(record);
                    return Ok(false);
                }
                Err(TrySendError::Closed(_)) => return Err(WorkerGone),
            }
        }
        let resume = self.paused;
        self.paused = false;
        Ok(resume)
    }
}

async fn run_partition<S>(
    engine: Arc<RetryEngine<S>>,
    consumer: Arc<StreamConsumer>,
    mut records: mpsc::Receiver<Record>,
    mut shutdown: watch::Receiver<bool>,
    redelivery_pause: Duration,
) where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    loop {
        let record = tokio::select! {
            _ = shutdown.changed() => break,
            record = records.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = engine.hold(&record) => {}
        }
        if !deliver_until_handled(&engine, &record, redelivery_pause, &mut shutdown).await {
            break;
        }
        if let Err(e) = commit(&consumer, &record) {
            tracing::warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "KafkaListener: commit failed"
            );
        }
    }
}

fn commit(consumer: &StreamConsumer, record: &Record) -> KafkaResult<()> {
    let mut offsets = TopicPartitionList::new();
    let next = Offset::Offset(record.offset + 1);
    offsets.add_partition_offset(&record.topic, record.partition, next)?;
    consumer.commit(&offsets, CommitMode::Async)
}
