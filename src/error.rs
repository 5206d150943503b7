//! Error types for the retry engine
//!
//! Two failure classes never mix:
//! - processing failures (raised by the processor) are routed: retry topic or dead letter
//! - publish failures (raised while forwarding) propagate so the inbound record is redelivered
use crate::record::TopicPartition;
use std::borrow::Cow;
use std::fmt;

/// Boxed error raised by a processor.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The engine's own processing-error family.
///
/// Processors raise these (directly or wrapped in their own errors) to name the failure kind the
/// classifier and the diagnostic headers work with. The kind is a stable, fully-qualified name
/// such as `"billing.InvoiceRejected"`; the fatal allow-list is matched against it.
#[derive(Debug)]
pub struct ProcessingError {
    kind: Cow<'static, str>,
    message: String,
    source: Option<BoxError>,
}

impl ProcessingError {
    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), source: None }
    }

    /// A failure with no message; the diagnostic message header is then omitted.
    pub fn bare(kind: impl Into<Cow<'static, str>>) -> Self {
        Self::new(kind, String::new())
    }

    /// Attach the error that caused this one.
    pub fn caused_by<E>(mut self, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Generic wrapper the listener boundary puts around whatever a processor raised.
///
/// Carries the record position for logs. It is never the interesting error: the classifier looks
/// through it when picking the diagnostic.
#[derive(Debug, thiserror::Error)]
#[error("listener failed to process record at {position} offset {offset}")]
pub struct ListenerFailure {
    position: TopicPartition,
    offset: i64,
    #[source]
    source: BoxError,
}

impl ListenerFailure {
    pub fn new(position: TopicPartition, offset: i64, source: BoxError) -> Self {
        Self { position, offset, source }
    }

    pub fn position(&self) -> &TopicPartition {
        &self.position
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// The error the processor raised.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Failure to write a record to the broker.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The broker (or the client in front of it) refused or failed the write.
    #[error("publish to {topic} failed: {reason}")]
    Broker { topic: String, reason: String },
    /// The write did not complete in time.
    #[error("publish to {topic} timed out")]
    Timeout { topic: String },
    /// The target topic does not exist.
    #[error("unknown topic {topic}")]
    UnknownTopic { topic: String },
}

impl PublishError {
    pub fn topic(&self) -> &str {
        match self {
            Self::Broker { topic, .. } | Self::Timeout { topic } | Self::UnknownTopic { topic } => {
                topic
            }
        }
    }
}

/// Failure to read from or commit to a record source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("unknown topic {topic}")]
    UnknownTopic { topic: String },
    #[error("unknown partition {position}")]
    UnknownPartition { position: TopicPartition },
    #[error("source failed: {reason}")]
    Broker { reason: String },
}

/// Errors surfaced by [`crate::engine::RetryEngine::handle`].
///
/// A processing failure is never one of these: it always becomes a routing decision.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Forwarding failed; the inbound record must not be acknowledged.
    #[error("forwarding record from {from} to {destination_topic} failed")]
    Publish {
        from: TopicPartition,
        destination_topic: String,
        #[source]
        source: PublishError,
    },
    /// The record came from a topic this engine does not consume (e.g. the dead-letter topic).
    #[error("record from {topic} is not routable by this engine")]
    Unroutable { topic: String },
}

impl EngineError {
    /// Whether the consuming layer should redeliver the inbound record.
    pub fn is_redeliverable(&self) -> bool {
        matches!(self, Self::Publish { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn processing_error_displays_message_only() {
        let err = ProcessingError::new("demo.Failure", "boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), "demo.Failure");
        assert!(err.source().is_none());
    }

    #[test]
    fn processing_error_exposes_cause() {
        let err = ProcessingError::bare("demo.Failure")
            .caused_by(io::Error::new(io::ErrorKind::Other, "disk"));
        assert_eq!(err.message(), "");
        let cause = err.source().expect("cause");
        assert!(cause.is::<io::Error>());
    }

    #[test]
    fn listener_failure_chains_to_processor_error() {
        let inner: BoxError = Box::new(ProcessingError::new("demo.Failure", "boom"));
        let failure = ListenerFailure::new(TopicPartition::new("orders", 1), 5, inner);
        assert!(failure.to_string().contains("orders-1"));
        let source = failure.source().expect("source");
        assert!(source.is::<ProcessingError>());
        assert_eq!(failure.offset(), 5);
        assert!(failure.inner().is::<ProcessingError>());
    }

    #[test]
    fn only_publish_errors_are_redeliverable() {
        let publish = EngineError::Publish {
            from: TopicPartition::new("orders", 0),
            destination_topic: "orders-retry".into(),
            source: PublishError::Timeout { topic: "orders-retry".into() },
        };
        assert!(publish.is_redeliverable());
        assert!(!EngineError::Unroutable { topic: "orders-dlt".into() }.is_redeliverable());
    }

    #[test]
    fn publish_error_reports_topic() {
        let err = PublishError::Broker { topic: "t".into(), reason: "down".into() };
        assert_eq!(err.topic(), "t");
        assert!(err.to_string().contains("down"));
    }
}
