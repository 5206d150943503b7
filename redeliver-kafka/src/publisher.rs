use crate::headers::to_kafka_headers;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaResult;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use redeliver::{Delivered, OutboundRecord, PublishError, Publisher};
use std::time::Duration;

/// How long a send may wait for room in the producer queue.
const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Producer settings for forwarding: full acknowledgement, idempotent writes.
pub fn producer_config(brokers: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers)
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set("message.timeout.ms", "10000");
    config
}

/// [`Publisher`] backed by an `rdkafka` `FutureProducer`.
///
/// A send resolves once the broker acknowledged the write, so a forwarded record is durable before
/// the inbound one is committed.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher").field("queue_timeout", &self.queue_timeout).finish()
    }
}

impl KafkaPublisher {
    /// Create a publisher with an existing Kafka producer.
    pub fn new(producer: FutureProducer) -> Self {
        Self { producer, queue_timeout: DEFAULT_QUEUE_TIMEOUT }
    }

    /// Create a producer from [`producer_config`].
    pub fn connect(brokers: &str) -> KafkaResult<Self> {
        Ok(Self::new(producer_config(brokers).create()?))
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn producer(&self) -> &FutureProducer {
        &self.producer
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, record: OutboundRecord) -> Result<Delivered, PublishError> {
        let mut future = FutureRecord::<[u8], [u8]>::to(&record.topic)
            .payload(record.payload.as_slice())
            .headers(to_kafka_headers(&record.headers));
        if let Some(key) = record.key.as_deref() {
            future = future.key(key);
        }
        if let Some(timestamp) = record.timestamp {
            future = future.timestamp(timestamp);
        }

        match self.producer.send(future, Timeout::After(self.queue_timeout)).await {
            Ok((partition, offset)) => Ok(Delivered { partition, offset }),
            Err((e, _)) => {
                tracing::warn!(topic = %record.topic, error = %e, "KafkaPublisher: send failed");
                Err(PublishError::Broker { topic: record.topic.clone(), reason: e.to_string() })
            }
        }
    }
}
