//! Convenient re-exports for wiring an engine.
pub use crate::{
    classify::{Classifier, ErrorClass},
    config::RetryConfig,
    engine::{Disposition, RetryEngine},
    error::{BoxError, EngineError, ProcessingError},
    listener::{ListenerContainer, ListenerHandle, RecordSource},
    processor::{processor_fn, Processor},
    publish::{DeliveryPublisher, Publisher},
    record::{Headers, OutboundRecord, Record, TopicPartition},
    retry::{Destination, RetryPolicy},
    telemetry::{LogSink, TelemetrySink},
};
