mod common;

use common::{attempt_count, Scripted, FAILURE};
use redeliver::broker::InMemoryBroker;
use redeliver::error::BoxError;
use redeliver::telemetry::{CountdownSink, EngineEvent, ForwardEvent, MemorySink, MulticastSink};
use redeliver::{Classifier, DeliveryPublisher, OutboundRecord, Publisher, RetryEngine};
use std::time::Duration;

fn echo(_call: usize, payload: &[u8]) -> Result<Vec<u8>, BoxError> {
    Ok(payload.to_vec())
}

fn is_publish_failure(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Forward(ForwardEvent::PublishFailed { .. }))
}

#[tokio::test]
async fn failed_forward_redelivers_the_inbound_record() {
    // Long enough that the forwarded retry record is still held at shutdown.
    let policy = common::policy(3, Duration::from_millis(500));
    let broker = InMemoryBroker::for_policy(&policy, 1);
    let processor = Scripted::always(FAILURE);
    let forwarded = CountdownSink::forwards(1);
    let events = MemorySink::new();
    let engine = RetryEngine::new(
        policy,
        Classifier::default(),
        processor.clone(),
        DeliveryPublisher::new(broker.clone()),
    )
    .with_sink(MulticastSink::new(forwarded.clone(), events.clone()));

    broker.publish(OutboundRecord::new("orders", "X")).await.unwrap();
    broker.fail_next_publishes(2);
    let handle = common::listen(engine, &broker).await;

    assert!(forwarded.wait(Duration::from_secs(5)).await);
    handle.shutdown().await;

    // Same record processed three times at attempt 1: two failed forwards, then one that landed.
    assert_eq!(processor.calls(), 3);
    let failures = events.events().iter().filter(|e| is_publish_failure(e)).count();
    assert_eq!(failures, 2);

    let retries = broker.records("orders-retry");
    assert_eq!(retries.len(), 1);
    assert_eq!(attempt_count(&retries[0]), Some(2));
    assert_eq!(broker.committed_offset("orders", 0), Some(1));
}

#[tokio::test]
async fn unhandled_record_is_not_committed() {
    let policy = common::policy(3, Duration::from_millis(10));
    let broker = InMemoryBroker::for_policy(&policy, 1);
    let attempts = CountdownSink::matching(1, is_publish_failure);
    let engine = RetryEngine::new(
        policy,
        Classifier::default(),
        Scripted::always(FAILURE),
        DeliveryPublisher::new(broker.clone()),
    )
    .with_sink(attempts.clone());

    broker.publish(OutboundRecord::new("orders", "X")).await.unwrap();
    broker.fail_next_publishes(usize::MAX);
    let handle = common::listen(engine, &broker).await;

    assert!(attempts.wait(Duration::from_secs(5)).await);
    handle.shutdown().await;

    assert_eq!(broker.committed_offset("orders", 0), None);
    assert!(broker.records("orders-retry").is_empty());
}

#[tokio::test]
async fn restarted_listener_resumes_from_committed_offset() {
    let policy = common::policy(3, Duration::from_millis(10));
    let broker = InMemoryBroker::for_policy(&policy, 1);
    let first = Scripted::new(echo);
    let latch = CountdownSink::new(2);
    let engine = RetryEngine::new(
        policy.clone(),
        Classifier::default(),
        first.clone(),
        DeliveryPublisher::new(broker.clone()),
    )
    .with_sink(latch.clone());
    let handle = common::listen(engine, &broker).await;
    broker.publish(OutboundRecord::new("orders", "a")).await.unwrap();
    broker.publish(OutboundRecord::new("orders", "b")).await.unwrap();
    assert!(latch.wait(Duration::from_secs(5)).await);
    handle.shutdown().await;

    let second = Scripted::new(echo);
    let latch = CountdownSink::new(1);
    let engine = RetryEngine::new(
        policy,
        Classifier::default(),
        second.clone(),
        DeliveryPublisher::new(broker.clone()),
    )
    .with_sink(latch.clone());
    broker.publish(OutboundRecord::new("orders", "c")).await.unwrap();
    let handle = common::listen(engine, &broker).await;
    assert!(latch.wait(Duration::from_secs(5)).await);
    handle.shutdown().await;

    assert_eq!(first.calls(), 2);
    assert_eq!(second.calls(), 1);
    assert_eq!(broker.committed_offset("orders", 0), Some(3));
}
