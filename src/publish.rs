//! Delivery publisher.
//!
//! [`Publisher`] is the broker-facing write capability the engine consumes; adapters implement it
//! (the in-memory broker here, `redeliver-kafka` for Kafka). It must be safe to share across
//! partition workers.
//!
//! [`DeliveryPublisher`] wraps one with an optional deadline and logging. A failed or timed-out
//! write is returned to the caller untouched: the inbound record must then stay unacknowledged so
//! the consuming layer redelivers it.

use crate::error::PublishError;
use crate::record::{Delivered, Headers, OutboundRecord};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Broker write capability.
#[async_trait]
pub trait Publisher: Send + Sync + fmt::Debug {
    /// Write one record. Success means the broker durably accepted it.
    async fn publish(&self, record: OutboundRecord) -> Result<Delivered, PublishError>;
}

#[async_trait]
impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    async fn publish(&self, record: OutboundRecord) -> Result<Delivered, PublishError> {
        (**self).publish(record).await
    }
}

/// Shared, deadline-aware front for a [`Publisher`].
#[derive(Clone)]
pub struct DeliveryPublisher {
    inner: Arc<dyn Publisher>,
    timeout: Option<Duration>,
}

impl fmt::Debug for DeliveryPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryPublisher")
            .field("inner", &self.inner)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DeliveryPublisher {
    pub fn new<P>(inner: P) -> Self
    where
        P: Publisher + 'static,
    {
        Self { inner: Arc::new(inner), timeout: None }
    }

    pub fn from_arc(inner: Arc<dyn Publisher>) -> Self {
        Self { inner, timeout: None }
    }

    /// Fail writes that take longer than `timeout` with [`PublishError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Publish `payload` to `topic` with the given key and headers.
    pub async fn publish(
        &self,
        topic: &str,
        key: Option<Vec<u8>>,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<Delivered, PublishError> {
        let record = OutboundRecord::new(topic, payload).with_key(key).with_headers(headers);
        self.send(record).await
    }

    /// Publish a fully-built record.
    pub async fn send(&self, record: OutboundRecord) -> Result<Delivered, PublishError> {
        let topic = record.topic.clone();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.publish(record))
                .await
                .unwrap_or_else(|_| Err(PublishError::Timeout { topic: topic.clone() })),
            None => self.inner.publish(record).await,
        };
        match &result {
            Ok(delivered) => tracing::debug!(
                topic = %topic,
                partition = delivered.partition,
                offset = delivered.offset,
                "record published"
            ),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "record publish failed"),
        }
        result
    }
}
