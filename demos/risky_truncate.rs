//! The reference "risky truncate" processor behind a listener.
//!
//! Configuration comes from `REDELIVER_*` environment variables when `REDELIVER_MAIN_TOPIC` is
//! set, otherwise from the JSON below. `RISKY_ERROR_PERCENTAGE` (default 30) sets the failure rate
//! and `RISKY_FATAL=1` makes every failure fatal.

use redeliver::broker::InMemoryBroker;
use redeliver::config::ENV_MAIN_TOPIC;
use redeliver::prelude::*;
use redeliver::processor::{RiskyTruncate, PROCESSING_FATAL};
use redeliver::telemetry::MemorySink;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG: &str = r#"{
    "main_topic": "risky",
    "retry_topic_suffix": "-retry",
    "dlq_topic_suffix": "-dlt",
    "interval_ms": 100,
    "max_attempts": 3,
    "fatal_kinds": ["redeliver.ProcessingFatal"]
}"#;

const MESSAGES: [&str; 5] = ["hi", "hello", "hello world", "truncate me please", "ok"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Risky Truncate Example ===\n");

    let mut config = match std::env::var(ENV_MAIN_TOPIC) {
        Ok(_) => RetryConfig::from_env()?,
        Err(_) => RetryConfig::from_json_str(DEFAULT_CONFIG)?,
    };
    if !config.fatal_kinds.iter().any(|kind| kind == PROCESSING_FATAL) {
        config.fatal_kinds.push(PROCESSING_FATAL.to_string());
    }

    let error_percentage = std::env::var("RISKY_ERROR_PERCENTAGE")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(30);
    let mut processor = RiskyTruncate::new(error_percentage);
    if std::env::var("RISKY_FATAL").is_ok_and(|v| v == "1") {
        processor = processor.fatal();
    }
    println!("error percentage: {}%\n", processor.error_percentage());

    let policy = config.policy()?;
    let broker = InMemoryBroker::for_policy(&policy, 1);
    let events = MemorySink::new();
    let engine = config
        .engine(processor, DeliveryPublisher::new(broker.clone()))?
        .with_sink(events.clone());
    let listener = ListenerContainer::new(Arc::new(engine))
        .with_redelivery_pause(Duration::from_millis(100))
        .start(Arc::new(broker.clone()))
        .await?;

    for message in MESSAGES {
        broker.publish(OutboundRecord::new(policy.main_topic(), message)).await?;
    }

    // Every message settles within max_attempts intervals; leave some slack.
    let settle = policy.interval() * policy.max_attempts() + Duration::from_secs(1);
    tokio::time::sleep(settle).await;
    listener.shutdown().await;

    println!("\nEvents:");
    for event in events.events() {
        println!("  - {}", event);
    }
    println!("\nDead letters:");
    for record in broker.records(policy.dlq_topic()) {
        println!("  - {}", record.payload_str());
    }

    Ok(())
}
