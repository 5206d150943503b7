use crate::classify::ErrorClass;
use crate::record::TopicPartition;
use crate::retry::Destination;
use crate::router::HopReason;
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Events emitted by the engine while handling records.
///
/// One [`AttemptEvent`] follows every processing attempt, success or failure; a
/// [`ForwardEvent`] follows every attempt to forward a failed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Processing attempt outcome
    Attempt(AttemptEvent),
    /// Forwarding outcome
    Forward(ForwardEvent),
}

/// Outcome of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    Succeeded {
        source: TopicPartition,
        offset: i64,
        /// Attempt number (1-indexed)
        attempt: u32,
        duration: Duration,
    },
    Failed {
        source: TopicPartition,
        offset: i64,
        attempt: u32,
        class: ErrorClass,
        /// Kind of the selected diagnostic error
        kind: String,
        duration: Duration,
    },
}

/// Outcome of forwarding a failed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardEvent {
    /// The record was durably written to its next topic.
    Forwarded {
        source: TopicPartition,
        offset: i64,
        destination: Destination,
        topic: String,
        /// Attempt number carried by the forwarded record
        attempt: u32,
        reason: HopReason,
        delay: Duration,
    },
    /// The write failed; the inbound record stays unacknowledged.
    PublishFailed { source: TopicPartition, offset: i64, topic: String, error: String },
}

impl EngineEvent {
    /// Whether this event closes out a processing attempt.
    pub fn is_attempt(&self) -> bool {
        matches!(self, EngineEvent::Attempt(_))
    }

    /// Whether this event reports a successful forward.
    pub fn is_forwarded(&self) -> bool {
        matches!(self, EngineEvent::Forward(ForwardEvent::Forwarded { .. }))
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::Attempt(event) => write!(f, "Attempt::{}", event),
            EngineEvent::Forward(event) => write!(f, "Forward::{}", event),
        }
    }
}

impl fmt::Display for AttemptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptEvent::Succeeded { source, offset, attempt, duration } => {
                write!(f, "Succeeded({}@{}, #{}, {:?})", source, offset, attempt, duration)
            }
            AttemptEvent::Failed { source, offset, attempt, class, kind, duration } => write!(
                f,
                "Failed({}@{}, #{}, {} {}, {:?})",
                source, offset, attempt, class, kind, duration
            ),
        }
    }
}

impl fmt::Display for ForwardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardEvent::Forwarded { source, offset, topic, attempt, reason, .. } => {
                write!(f, "Forwarded({}@{} -> {}, #{}, {})", source, offset, topic, attempt, reason)
            }
            ForwardEvent::PublishFailed { source, offset, topic, error } => {
                write!(f, "PublishFailed({}@{} -> {}: {})", source, offset, topic, error)
            }
        }
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert an [`EngineEvent`] into a JSON value for external sinks.
pub fn event_to_json(event: &EngineEvent) -> serde_json::Value {
    match event {
        EngineEvent::Attempt(a) => match a {
            AttemptEvent::Succeeded { source, offset, attempt, duration } => json!({
                "kind": "attempt_succeeded",
                "topic": source.topic,
                "partition": source.partition,
                "offset": *offset,
                "attempt": *attempt,
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
            AttemptEvent::Failed { source, offset, attempt, class, kind, duration } => json!({
                "kind": "attempt_failed",
                "topic": source.topic,
                "partition": source.partition,
                "offset": *offset,
                "attempt": *attempt,
                "class": class.to_string(),
                "error_kind": kind,
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
        },
        EngineEvent::Forward(fw) => match fw {
            ForwardEvent::Forwarded {
                source,
                offset,
                destination,
                topic,
                attempt,
                reason,
                delay,
            } => json!({
                "kind": "forwarded",
                "from_topic": source.topic,
                "from_partition": source.partition,
                "from_offset": *offset,
                "destination": destination.to_string(),
                "topic": topic,
                "attempt": *attempt,
                "reason": reason.to_string(),
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
            ForwardEvent::PublishFailed { source, offset, topic, error } => json!({
                "kind": "publish_failed",
                "from_topic": source.topic,
                "from_partition": source.partition,
                "from_offset": *offset,
                "topic": topic,
                "error": error,
            }),
        },
    }
}
