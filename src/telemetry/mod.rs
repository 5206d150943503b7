//! Telemetry for the retry engine.
//!
//! The engine reports every processing attempt and every forward as an [`EngineEvent`]. Events
//! flow through `TelemetrySink` implementations which can log, record, count, or ship them to an
//! external system.
//!
//! # Event Types
//!
//! - **Attempt**: `Succeeded`, `Failed` (with classification and diagnostic kind)
//! - **Forward**: `Forwarded` (destination, topic, attempt number), `PublishFailed`
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented as a
//! `tower::Service<EngineEvent>` for composability. Emission is best-effort: a failing sink never
//! affects routing.
//!
//! ```rust
//! use redeliver::telemetry::{CountdownSink, EngineEvent, AttemptEvent};
//! use redeliver::TopicPartition;
//! use tower::Service;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let latch = CountdownSink::new(1);
//! let mut sink = latch.clone();
//! sink.call(EngineEvent::Attempt(AttemptEvent::Succeeded {
//!     source: TopicPartition::new("orders", 0),
//!     offset: 0,
//!     attempt: 1,
//!     duration: Duration::from_millis(2),
//! }))
//! .await
//! .unwrap();
//! assert!(latch.wait(Duration::from_secs(1)).await);
//! # }
//! ```

pub mod events;
pub mod sinks;

pub use events::{event_to_json, AttemptEvent, EngineEvent, ForwardEvent};
pub use sinks::{
    emit_best_effort, ComposedSinkError, CountdownSink, LogSink, MemorySink, MulticastSink,
    NullSink, TelemetrySink,
};
