#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Redeliver
//!
//! Retry and dead-letter orchestration for message consumers.
//!
//! A consumer of a main topic hands each record to a [`Processor`]. When processing fails the
//! record is forwarded, never dropped:
//!
//! - retryable failures go to the retry topic, stamped with their backoff due time
//! - fatal failures and records out of attempts go to the dead-letter topic
//!
//! Forwarded records carry lineage headers (attempt count, original topic, partition and offset)
//! and the diagnostic of the failure that sent them there.
//!
//! ## Quick Start
//!
//! ```rust
//! use redeliver::{
//!     broker::InMemoryBroker, processor_fn, Classifier, DeliveryPublisher, Destination, Record,
//!     RetryEngine, RetryPolicy,
//! };
//! use redeliver::error::{BoxError, ProcessingError};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let policy = RetryPolicy::builder()
//!     .main_topic("orders")
//!     .retry_topic_suffix("-retry")
//!     .dlq_topic_suffix("-dlt")
//!     .interval(Duration::from_millis(100))
//!     .max_attempts(3)
//!     .build()
//!     .unwrap();
//! let broker = InMemoryBroker::for_policy(&policy, 1);
//! let engine = RetryEngine::new(
//!     policy,
//!     Classifier::default(),
//!     processor_fn(|_payload: Vec<u8>| async move {
//!         Err::<Vec<u8>, BoxError>(ProcessingError::new("demo.Failure", "boom").into())
//!     }),
//!     DeliveryPublisher::new(broker.clone()),
//! );
//!
//! let disposition = engine.handle(&Record::new("orders", 0, 0, "hello")).await.unwrap();
//! assert!(disposition.is_forwarded());
//! assert_eq!(broker.records("orders-retry").len(), 1);
//! assert_eq!(engine.policy().destination_of("orders-retry"), Some(Destination::Retry));
//! # }
//! ```

pub mod backoff;
pub mod broker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod lineage;
pub mod listener;
pub mod prelude;
pub mod processor;
pub mod publish;
pub mod record;
pub mod retry;
pub mod router;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use backoff::{BackoffScheduler, FixedBackoff};
pub use classify::{Classification, Classifier, Diagnostic, ErrorClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RetryConfig};
pub use engine::{Disposition, RetryEngine};
pub use error::{EngineError, ProcessingError, PublishError, SourceError};
pub use lineage::{Lineage, Origin};
pub use listener::{ListenerContainer, ListenerHandle, RecordSource};
pub use processor::{processor_fn, Processor, RiskyTruncate};
pub use publish::{DeliveryPublisher, Publisher};
pub use record::{Delivered, Headers, OutboundRecord, Record, TopicPartition};
pub use retry::{BuildError, Destination, RetryPolicy, RetryPolicyBuilder};
pub use router::{route, AttemptResult, Hop, HopReason, Route};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
