use crate::{event_key, event_payload};
use rdkafka::producer::{FutureProducer, FutureRecord};
use redeliver::telemetry::{EngineEvent, TelemetrySink};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Telemetry sink shipping engine events to a Kafka topic as JSON.
///
/// Events are keyed by the topic their record was consumed from. Send failures are logged and
/// dropped.
#[derive(Clone)]
pub struct KafkaEventSink {
    topic: String,
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventSink").field("topic", &self.topic).finish()
    }
}

impl KafkaEventSink {
    /// Create a sink with an existing Kafka producer.
    pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), producer }
    }
}

impl tower_service::Service<EngineEvent> for KafkaEventSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: EngineEvent) -> Self::Future {
        let topic = self.topic.clone();
        let producer = self.producer.clone();
        let key = event_key(&event).to_string();
        let payload = match event_payload(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("KafkaEventSink: failed to serialize event: {e}");
                return Box::pin(async { Ok(()) });
            }
        };
        Box::pin(async move {
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);
            if let Err((e, _)) = producer.send(record, None).await {
                tracing::warn!("KafkaEventSink: failed to send event: {e}");
            }
            Ok(())
        })
    }
}

impl TelemetrySink for KafkaEventSink {
    type SinkError = Infallible;
}
