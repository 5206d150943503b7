//! Retry engine: runs the processor on one inbound record and decides what happens next.
//!
//! Per record:
//! 1. read the lineage from the headers
//! 2. run the processor; success acknowledges the record
//! 3. on failure, wrap the error the way the listener boundary does, classify it, route it, and
//!    build the forward headers
//! 4. hand the forward to the backoff scheduler, which publishes it immediately (stamped with its
//!    due time when it goes to the retry topic)
//!
//! [`RetryEngine::handle`] returns `Ok` only when the inbound record may be acknowledged: either
//! the processor succeeded or the forward was durably published. A publish failure comes back as
//! [`EngineError::Publish`] and the caller must redeliver the record.

use crate::backoff::BackoffScheduler;
use crate::classify::Classifier;
use crate::clock::Clock;
use crate::enrich::build_forward_headers;
use crate::error::{EngineError, ListenerFailure};
use crate::lineage::{Lineage, RecordDetails};
use crate::processor::Processor;
use crate::publish::DeliveryPublisher;
use crate::record::{Delivered, OutboundRecord, Record};
use crate::retry::{Destination, RetryPolicy};
use crate::router::{route, AttemptResult, HopReason, Route};
use crate::sleeper::Sleeper;
use crate::telemetry::{
    emit_best_effort, AttemptEvent, EngineEvent, ForwardEvent, NullSink, TelemetrySink,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How an inbound record was handled. Either way it may now be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The processor succeeded.
    Acked,
    /// The processor failed and the record was forwarded.
    Forwarded {
        destination: Destination,
        topic: String,
        reason: HopReason,
        /// Attempt number carried by the forwarded record.
        attempt: u32,
        delivered: Delivered,
    },
}

impl Disposition {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

/// Orchestrates processing, classification, routing and forwarding for one consumer group.
///
/// Shared by every partition worker; holds no per-record state.
pub struct RetryEngine<S = NullSink> {
    policy: Arc<RetryPolicy>,
    classifier: Classifier,
    processor: Arc<dyn Processor>,
    publisher: DeliveryPublisher,
    scheduler: BackoffScheduler,
    sink: S,
}

impl<S: fmt::Debug> fmt::Debug for RetryEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEngine")
            .field("policy", &self.policy)
            .field("classifier", &self.classifier)
            .field("publisher", &self.publisher)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl RetryEngine<NullSink> {
    /// Wire an engine. Backoff uses the system clock and tokio timers.
    pub fn new<P>(
        policy: RetryPolicy,
        classifier: Classifier,
        processor: P,
        publisher: DeliveryPublisher,
    ) -> Self
    where
        P: Processor + 'static,
    {
        tracing::info!(
            main_topic = policy.main_topic(),
            retry_topic = policy.retry_topic(),
            dlq_topic = policy.dlq_topic(),
            "Setting up retry topic: {} attempts per message, {} ms apart",
            policy.max_attempts(),
            policy.interval().as_millis()
        );
        let scheduler = BackoffScheduler::new(&policy);
        Self {
            policy: Arc::new(policy),
            classifier,
            processor: Arc::new(processor),
            publisher,
            scheduler,
            sink: NullSink,
        }
    }
}

impl<S> RetryEngine<S> {
    /// Report attempts and forwards to `sink`.
    pub fn with_sink<S2>(self, sink: S2) -> RetryEngine<S2>
    where
        S2: TelemetrySink,
    {
        RetryEngine {
            policy: self.policy,
            classifier: self.classifier,
            processor: self.processor,
            publisher: self.publisher,
            scheduler: self.scheduler,
            sink,
        }
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.scheduler = self.scheduler.with_clock(clock);
        self
    }

    pub fn with_sleeper<Z>(mut self, sleeper: Z) -> Self
    where
        Z: Sleeper + 'static,
    {
        self.scheduler = self.scheduler.with_sleeper(sleeper);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn scheduler(&self) -> &BackoffScheduler {
        &self.scheduler
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Wait out the backoff of a retry-topic record before it is handled.
    pub async fn hold(&self, record: &Record) -> Duration {
        self.scheduler.hold(record).await
    }
}

impl<S> RetryEngine<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Handle one inbound record from the main or retry topic.
    pub async fn handle(&self, record: &Record) -> Result<Disposition, EngineError> {
        let current = match self.policy.destination_of(&record.topic) {
            Some(d @ (Destination::Main | Destination::Retry)) => d,
            _ => return Err(EngineError::Unroutable { topic: record.topic.clone() }),
        };
        let lineage = Lineage::read(record);
        let max_attempts = self.policy.max_attempts();
        tracing::info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            attempt = lineage.attempt,
            "Message received ({}). Payload: {}",
            RecordDetails::new(record, lineage, max_attempts),
            record.payload_str()
        );

        let started = Instant::now();
        let outcome = self.processor.process(record.payload.clone()).await;
        let duration = started.elapsed();

        match outcome {
            Ok(result) => {
                tracing::info!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    attempt = lineage.attempt,
                    "Message successfully processed ({}). Result: {}",
                    RecordDetails::new(record, lineage, max_attempts),
                    String::from_utf8_lossy(&result)
                );
                self.emit(EngineEvent::Attempt(AttemptEvent::Succeeded {
                    source: record.topic_partition(),
                    offset: record.offset,
                    attempt: lineage.attempt,
                    duration,
                }))
                .await;
                Ok(Disposition::Acked)
            }
            Err(error) => {
                let failure = ListenerFailure::new(record.topic_partition(), record.offset, error);
                self.forward_failure(record, current, lineage, failure, duration).await
            }
        }
    }

    async fn forward_failure(
        &self,
        record: &Record,
        current: Destination,
        lineage: Lineage,
        failure: ListenerFailure,
        duration: Duration,
    ) -> Result<Disposition, EngineError> {
        let classified_at = self.scheduler.now_millis();
        let classification = self.classifier.classify(&failure);
        let max_attempts = self.policy.max_attempts();
        tracing::warn!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            attempt = lineage.attempt,
            class = %classification.class,
            kind = %classification.diagnostic.kind,
            error = %failure.inner(),
            "Message was failed to process ({})",
            RecordDetails::new(record, lineage, max_attempts)
        );
        self.emit(EngineEvent::Attempt(AttemptEvent::Failed {
            source: record.topic_partition(),
            offset: record.offset,
            attempt: lineage.attempt,
            class: classification.class,
            kind: classification.diagnostic.kind.clone(),
            duration,
        }))
        .await;

        let anchored = lineage.anchored_at(record);
        let result = AttemptResult::Failed(classification.class);
        let Route::Forward(hop) = route(current, &anchored, result, &self.policy) else {
            return Ok(Disposition::Acked);
        };

        let headers = build_forward_headers(
            &record.headers,
            &hop.lineage,
            self.policy.main_topic(),
            &classification.diagnostic,
        );
        let topic = self.policy.topic_for(hop.destination).to_string();
        let outbound = OutboundRecord::new(topic.clone(), record.payload.clone())
            .with_key(record.key.clone())
            .with_headers(headers);

        let published = self
            .scheduler
            .schedule_forward(outbound, hop.delay, classified_at, &self.publisher)
            .await;
        match published {
            Ok(delivered) => {
                tracing::info!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    destination = %hop.destination,
                    target = %topic,
                    attempt = hop.lineage.attempt,
                    reason = %hop.reason,
                    delay_ms = hop.delay.as_millis() as u64,
                    "record forwarded"
                );
                self.emit(EngineEvent::Forward(ForwardEvent::Forwarded {
                    source: record.topic_partition(),
                    offset: record.offset,
                    destination: hop.destination,
                    topic: topic.clone(),
                    attempt: hop.lineage.attempt,
                    reason: hop.reason,
                    delay: hop.delay,
                }))
                .await;
                Ok(Disposition::Forwarded {
                    destination: hop.destination,
                    topic,
                    reason: hop.reason,
                    attempt: hop.lineage.attempt,
                    delivered,
                })
            }
            Err(source) => {
                tracing::error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    target = %topic,
                    error = %source,
                    "forwarding failed; record will be redelivered"
                );
                self.emit(EngineEvent::Forward(ForwardEvent::PublishFailed {
                    source: record.topic_partition(),
                    offset: record.offset,
                    topic: topic.clone(),
                    error: source.to_string(),
                }))
                .await;
                Err(EngineError::Publish {
                    from: record.topic_partition(),
                    destination_topic: topic,
                    source,
                })
            }
        }
    }

    async fn emit(&self, event: EngineEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}
