//! Retry and dead-letter flow against the in-memory broker.
//!
//! Three messages go to the main topic: one succeeds, one keeps failing until it runs out of
//! attempts, one fails fatally on its first attempt.

use redeliver::broker::InMemoryBroker;
use redeliver::error::{BoxError, ProcessingError};
use redeliver::lineage::{decode_i32, header};
use redeliver::prelude::*;
use redeliver::telemetry::{CountdownSink, MulticastSink};
use std::sync::Arc;
use std::time::Duration;

const FLAKY: &str = "demo.InventoryUnavailable";
const FATAL: &str = "demo.MalformedOrder";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for LogSink and the engine's own logs
    tracing_subscriber::fmt::init();

    println!("=== Retry / Dead-Letter Example ===\n");

    let policy = RetryPolicy::builder()
        .main_topic("orders")
        .retry_topic_suffix("-retry")
        .dlq_topic_suffix("-dlt")
        .interval(Duration::from_millis(200))
        .max_attempts(3)
        .build()?;
    let broker = InMemoryBroker::for_policy(&policy, 2);

    let processor = processor_fn(|payload: Vec<u8>| async move {
        match payload.as_slice() {
            b"flaky" => Err::<Vec<u8>, BoxError>(
                ProcessingError::new(FLAKY, "warehouse did not answer").into(),
            ),
            b"broken" => Err(ProcessingError::new(FATAL, "order has no lines")
                .caused_by(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty"))
                .into()),
            _ => Ok(payload),
        }
    });

    // "flaky": retry, retry, dead letter. "broken": dead letter.
    let latch = CountdownSink::forwards(4);
    let engine = RetryEngine::new(
        policy,
        Classifier::with_fatal_kinds([FATAL]),
        processor,
        DeliveryPublisher::new(broker.clone()),
    )
    .with_sink(MulticastSink::new(latch.clone(), LogSink));

    let listener = ListenerContainer::new(Arc::new(engine)).start(Arc::new(broker.clone())).await?;

    for payload in ["ok", "flaky", "broken"] {
        broker.publish(OutboundRecord::new("orders", payload)).await?;
    }

    let done = latch.wait(Duration::from_secs(10)).await;
    listener.shutdown().await;
    println!("\nAll forwards observed: {done}\n");

    for topic in ["orders-retry", "orders-dlt"] {
        println!("{topic}:");
        for record in broker.records(topic) {
            println!(
                "  {} attempt-count={:?} exception-kind={:?} cause={:?}",
                record.payload_str(),
                record.headers.last(header::ATTEMPT_COUNT).and_then(decode_i32),
                record.headers.last_str(header::EXCEPTION_KIND),
                record.headers.last_str(header::EXCEPTION_CAUSE_KIND),
            );
        }
    }

    Ok(())
}
