//! Kafka adapter for `redeliver` (companion crate).
//!
//! With the `client` feature:
//! - [`KafkaPublisher`]: forwards records through a `FutureProducer`
//! - [`KafkaListener`]: runs a [`redeliver::RetryEngine`] from a `StreamConsumer`, one worker per
//!   assigned partition, committing only handled offsets
//! - [`KafkaEventSink`]: ships engine events as JSON payloads
//!
//! Bring your own client configuration; [`consumer_config`] and [`producer_config`] cover the
//! settings the listener relies on.

use redeliver::telemetry::{event_to_json, EngineEvent};

#[cfg(feature = "client")]
mod headers;
#[cfg(feature = "client")]
mod listener;
#[cfg(feature = "client")]
mod publisher;
#[cfg(feature = "client")]
mod sink;

#[cfg(feature = "client")]
pub use headers::{from_kafka_headers, record_from_message, to_kafka_headers};
#[cfg(feature = "client")]
pub use listener::{consumer_config, KafkaListener};
#[cfg(feature = "client")]
pub use publisher::{producer_config, KafkaPublisher};
#[cfg(feature = "client")]
pub use sink::KafkaEventSink;

/// JSON payload shipped for `event`.
pub fn event_payload(event: &EngineEvent) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&event_to_json(event))
}

/// Partitioning key for `event`: the topic the event's record was consumed from.
pub fn event_key(event: &EngineEvent) -> &str {
    use redeliver::telemetry::{AttemptEvent, ForwardEvent};
    match event {
        EngineEvent::Attempt(AttemptEvent::Succeeded { source, .. })
        | EngineEvent::Attempt(AttemptEvent::Failed { source, .. })
        | EngineEvent::Forward(ForwardEvent::Forwarded { source, .. })
        | EngineEvent::Forward(ForwardEvent::PublishFailed { source, .. }) => &source.topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redeliver::telemetry::AttemptEvent;
    use redeliver::TopicPartition;
    use std::time::Duration;

    #[test]
    fn payload_is_json_keyed_by_source_topic() {
        let event = EngineEvent::Attempt(AttemptEvent::Succeeded {
            source: TopicPartition::new("orders-retry", 1),
            offset: 7,
            attempt: 2,
            duration: Duration::from_millis(4),
        });
        let value: serde_json::Value = serde_json::from_slice(&event_payload(&event).unwrap())
            .expect("payload is json");
        assert_eq!(value["kind"], "attempt_succeeded");
        assert_eq!(value["attempt"], 2);
        assert_eq!(event_key(&event), "orders-retry");
    }
}
