#![cfg(feature = "client")]

use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    consumer::{Consumer, StreamConsumer},
    producer::{FutureProducer, Producer},
    ClientConfig, Message,
};
use redeliver::error::{BoxError, ProcessingError};
use redeliver::lineage::{decode_i32, header};
use redeliver::telemetry::{AttemptEvent, CountdownSink, EngineEvent};
use redeliver::{
    processor_fn, Classifier, DeliveryPublisher, OutboundRecord, Publisher, RetryEngine,
    RetryPolicy, TopicPartition,
};
use redeliver_kafka::{consumer_config, KafkaEventSink, KafkaListener, KafkaPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_service::Service;
use uuid::Uuid;

// Requires Kafka running. If REDELIVER_TEST_KAFKA_BROKERS is unset, the tests skip.
fn brokers() -> Option<String> {
    match std::env::var("REDELIVER_TEST_KAFKA_BROKERS") {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("skipping: set REDELIVER_TEST_KAFKA_BROKERS (e.g. 127.0.0.1:9092)");
            None
        }
    }
}

async fn create_topics(brokers: &str, names: &[&str]) -> AdminClient<DefaultClientContext> {
    let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()
        .expect("failed to create Kafka AdminClient");
    let topics: Vec<NewTopic<'_>> =
        names.iter().map(|name| NewTopic::new(name, 1, TopicReplication::Fixed(1))).collect();
    admin_client
        .create_topics(&topics, &AdminOptions::new())
        .await
        .expect("Failed to create topics");
    admin_client
}

async fn subscribed(brokers: &str, topic: &str) -> StreamConsumer {
    let group = format!("redeliver-test-reader-{}", Uuid::new_v4());
    let consumer: StreamConsumer =
        consumer_config(brokers, &group).create().expect("failed to create Kafka consumer");
    consumer.subscribe(&[topic]).expect("Failed to subscribe to topic");
    consumer
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publishes_events_to_kafka() {
    let Some(brokers) = brokers() else { return };
    let topic_name = format!("redeliver.events.test.{}", Uuid::new_v4());
    let admin_client = create_topics(&brokers, &[topic_name.as_str()]).await;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("message.timeout.ms", "10000")
        .create()
        .expect("failed to create Kafka producer");

    let mut sink = KafkaEventSink::new(producer.clone(), &topic_name);
    let event = EngineEvent::Attempt(AttemptEvent::Succeeded {
        source: TopicPartition::new("orders", 0),
        offset: 3,
        attempt: 1,
        duration: Duration::from_millis(50),
    });
    sink.call(event).await.expect("failed to sink engine event to Kafka");
    producer.flush(Duration::from_secs(5)).expect("Failed to flush producer");

    let consumer = subscribed(&brokers, &topic_name).await;
    let msg = tokio::time::timeout(Duration::from_secs(10), consumer.recv())
        .await
        .expect("timeout waiting for message")
        .expect("failed to receive message from Kafka");

    let val: serde_json::Value =
        serde_json::from_slice(msg.payload().expect("message has no payload"))
            .expect("failed to parse payload as JSON");
    assert_eq!(val["kind"], "attempt_succeeded");
    assert_eq!(val["offset"], 3);
    assert_eq!(val["duration_ms"], 50);
    assert_eq!(msg.key(), Some(&b"orders"[..]));

    consumer.unsubscribe();
    admin_client
        .delete_topics(&[topic_name.as_str()], &AdminOptions::new())
        .await
        .expect("Failed to delete topic");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_record_reaches_dead_letter_topic() {
    let Some(brokers) = brokers() else { return };
    let base = format!("redeliver.orders.{}", Uuid::new_v4());
    let (retry, dlt) = (format!("{base}-retry"), format!("{base}-dlt"));
    let topics = [base.as_str(), retry.as_str(), dlt.as_str()];
    let admin_client = create_topics(&brokers, &topics).await;

    let policy = RetryPolicy::builder()
        .main_topic(base.clone())
        .retry_topic_suffix("-retry")
        .dlq_topic_suffix("-dlt")
        .interval(Duration::from_millis(200))
        .max_attempts(2)
        .build()
        .unwrap();
    let publisher = KafkaPublisher::connect(&brokers).expect("failed to create Kafka producer");
    let latch = CountdownSink::forwards(2);
    let engine = RetryEngine::new(
        policy,
        Classifier::default(),
        processor_fn(|_payload: Vec<u8>| async move {
            Err::<Vec<u8>, BoxError>(ProcessingError::new("demo.Failure", "boom").into())
        }),
        DeliveryPublisher::new(publisher.clone()),
    )
    .with_sink(latch.clone());

    let group = format!("redeliver-test-group-{}", Uuid::new_v4());
    let consumer: StreamConsumer =
        consumer_config(&brokers, &group).create().expect("failed to create Kafka consumer");
    let listener = KafkaListener::new(consumer, Arc::new(engine))
        .expect("failed to subscribe")
        .with_redelivery_pause(Duration::from_millis(100));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(listener.run(shutdown_rx));

    publisher.publish(OutboundRecord::new(base.clone(), "X")).await.expect("seed publish");
    assert!(latch.wait(Duration::from_secs(30)).await, "record was not forwarded twice");

    let reader = subscribed(&brokers, &dlt).await;
    let msg = tokio::time::timeout(Duration::from_secs(10), reader.recv())
        .await
        .expect("timeout waiting for dead letter")
        .expect("failed to receive dead letter");
    assert_eq!(msg.payload(), Some(&b"X"[..]));
    let headers = redeliver_kafka::record_from_message(&msg).headers;
    assert_eq!(headers.last(header::ATTEMPT_COUNT).and_then(decode_i32), Some(2));
    assert_eq!(headers.last_str(header::EXCEPTION_KIND).as_deref(), Some("demo.Failure"));

    let _ = shutdown_tx.send(true);
    running.await.expect("listener task");
    admin_client
        .delete_topics(&topics, &AdminOptions::new())
        .await
        .expect("Failed to delete topics");
}
