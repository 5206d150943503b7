//! Attempt ledger: lineage metadata carried in record headers.
//!
//! Lineage tracks one logical message across hops (main topic → retry topic → dead letter):
//! the attempt number and the position of the message's first appearance on the main topic.
//!
//! Encodings are fixed-width big-endian so that non-Rust consumers can decode them:
//! - attempt count and original partition: 4-byte signed int
//! - original offset and backoff due time: 8-byte signed long
//! - everything else: UTF-8
//!
//! Reading is pure. A malformed value (wrong width) is treated as absent; a corrupt header must
//! never wedge a partition.

use crate::record::{Headers, Record};
use std::fmt;

/// Header names written and read by the engine.
pub mod header {
    /// Partition of the first appearance on the main topic.
    pub const ORIGINAL_PARTITION: &str = "original-partition";
    /// Offset of the first appearance on the main topic.
    pub const ORIGINAL_OFFSET: &str = "original-offset";
    /// Topic of the first appearance.
    pub const ORIGINAL_TOPIC: &str = "original-topic";
    /// Attempt number the receiving consumer is about to make.
    pub const ATTEMPT_COUNT: &str = "attempt-count";
    /// Kind name of the diagnostic error.
    pub const EXCEPTION_KIND: &str = "exception-kind";
    /// Message of the diagnostic error; absent when empty.
    pub const EXCEPTION_MESSAGE: &str = "exception-message";
    /// Kind name of the diagnostic error's cause; absent when there is no cause.
    pub const EXCEPTION_CAUSE_KIND: &str = "exception-cause-kind";
    /// Wall-clock epoch millis at which a retry record becomes eligible for processing.
    pub const BACKOFF_DUE: &str = "backoff-due-timestamp";

    /// Headers describing a single failure. At most one generation is ever present.
    pub const DIAGNOSTIC: [&str; 3] = [EXCEPTION_KIND, EXCEPTION_MESSAGE, EXCEPTION_CAUSE_KIND];
}

/// Encode a 4-byte big-endian signed int header value.
pub fn encode_i32(value: i32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Encode an 8-byte big-endian signed long header value.
pub fn encode_i64(value: i64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decode a 4-byte big-endian signed int. `None` if the width is wrong.
pub fn decode_i32(bytes: &[u8]) -> Option<i32> {
    <[u8; 4]>::try_from(bytes).ok().map(i32::from_be_bytes)
}

/// Decode an 8-byte big-endian signed long. `None` if the width is wrong.
pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
    <[u8; 8]>::try_from(bytes).ok().map(i64::from_be_bytes)
}

pub(crate) fn read_i32(headers: &Headers, name: &str) -> Option<i32> {
    let raw = headers.last(name)?;
    let value = decode_i32(raw);
    if value.is_none() {
        tracing::warn!(header = name, width = raw.len(), "ignoring malformed int header");
    }
    value
}

pub(crate) fn read_i64(headers: &Headers, name: &str) -> Option<i64> {
    let raw = headers.last(name)?;
    let value = decode_i64(raw);
    if value.is_none() {
        tracing::warn!(header = name, width = raw.len(), "ignoring malformed long header");
    }
    value
}

/// Position of the very first appearance of a logical message on the main topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin {
    pub partition: i32,
    pub offset: i64,
}

/// Attempt-count and original-position metadata for one logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lineage {
    /// 1-based attempt number. The first appearance is attempt 1.
    pub attempt: u32,
    /// Set once on the first failure hop and never overwritten afterwards.
    pub origin: Option<Origin>,
}

impl Default for Lineage {
    fn default() -> Self {
        Self::first()
    }
}

impl Lineage {
    /// Lineage of a message seen for the first time.
    pub fn first() -> Self {
        Self { attempt: 1, origin: None }
    }

    /// Read lineage from a record's headers.
    ///
    /// - attempt header absent, malformed, or < 1 ⇒ attempt 1
    /// - original partition/offset are trusted only as a pair
    pub fn read(record: &Record) -> Self {
        Self::from_headers(&record.headers)
    }

    /// Header-level variant of [`Lineage::read`].
    pub fn from_headers(headers: &Headers) -> Self {
        let attempt = read_i32(headers, header::ATTEMPT_COUNT)
            .and_then(|a| u32::try_from(a).ok())
            .filter(|a| *a >= 1)
            .unwrap_or(1);
        let partition = read_i32(headers, header::ORIGINAL_PARTITION);
        let offset = read_i64(headers, header::ORIGINAL_OFFSET);
        let origin = match (partition, offset) {
            (Some(partition), Some(offset)) => Some(Origin { partition, offset }),
            _ => None,
        };
        Self { attempt, origin }
    }

    /// Pin the origin to `record`'s position unless one is already recorded.
    pub fn anchored_at(self, record: &Record) -> Self {
        let origin =
            self.origin.or(Some(Origin { partition: record.partition, offset: record.offset }));
        Self { origin, ..self }
    }

    /// Same lineage with a different attempt number; origin is carried over untouched.
    pub fn with_attempt(self, attempt: u32) -> Self {
        Self { attempt, ..self }
    }

    pub fn is_first_appearance(&self) -> bool {
        self.origin.is_none()
    }
}

/// Log-friendly rendering of a record plus its lineage.
///
/// `topic: orders, partition: 0, offset: 12, original partition: 0, original offset: 3,
/// attempt number: 2 of 3`
pub struct RecordDetails<'a> {
    record: &'a Record,
    lineage: Lineage,
    max_attempts: u32,
}

impl<'a> RecordDetails<'a> {
    pub fn new(record: &'a Record, lineage: Lineage, max_attempts: u32) -> Self {
        Self { record, lineage, max_attempts }
    }
}

impl fmt::Display for RecordDetails<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "topic: {}, partition: {}, offset: {}",
            self.record.topic, self.record.partition, self.record.offset
        )?;
        if let Some(origin) = self.lineage.origin {
            write!(
                f,
                ", original partition: {}, original offset: {}",
                origin.partition, origin.offset
            )?;
        }
        write!(f, ", attempt number: {} of {}", self.lineage.attempt, self.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(headers: Headers) -> Record {
        Record::new("orders-retry", 0, 9, "x").with_headers(headers)
    }

    #[test]
    fn absent_headers_mean_first_attempt() {
        let lineage = Lineage::read(&record_with(Headers::new()));
        assert_eq!(lineage, Lineage::first());
        assert!(lineage.is_first_appearance());
    }

    #[test]
    fn reads_attempt_and_origin() {
        let mut headers = Headers::new();
        headers.add(header::ATTEMPT_COUNT, encode_i32(3));
        headers.add(header::ORIGINAL_PARTITION, encode_i32(4));
        headers.add(header::ORIGINAL_OFFSET, encode_i64(1_000_000_000_000));
        let lineage = Lineage::read(&record_with(headers));
        assert_eq!(lineage.attempt, 3);
        assert_eq!(lineage.origin, Some(Origin { partition: 4, offset: 1_000_000_000_000 }));
    }

    #[test]
    fn latest_attempt_header_wins() {
        let mut headers = Headers::new();
        headers.add(header::ATTEMPT_COUNT, encode_i32(2));
        headers.add(header::ATTEMPT_COUNT, encode_i32(5));
        assert_eq!(Lineage::from_headers(&headers).attempt, 5);
    }

    #[test]
    fn origin_requires_both_halves() {
        let mut headers = Headers::new();
        headers.add(header::ORIGINAL_PARTITION, encode_i32(1));
        assert!(Lineage::from_headers(&headers).origin.is_none());

        let mut headers = Headers::new();
        headers.add(header::ORIGINAL_OFFSET, encode_i64(1));
        assert!(Lineage::from_headers(&headers).origin.is_none());
    }

    #[test]
    fn malformed_values_are_ignored() {
        let mut headers = Headers::new();
        headers.add(header::ATTEMPT_COUNT, vec![0, 2]);
        headers.add(header::ORIGINAL_PARTITION, encode_i32(1));
        headers.add(header::ORIGINAL_OFFSET, encode_i32(1));
        assert_eq!(Lineage::from_headers(&headers), Lineage::first());
    }

    #[test]
    fn non_positive_attempt_is_treated_as_first() {
        let mut headers = Headers::new();
        headers.add(header::ATTEMPT_COUNT, encode_i32(0));
        assert_eq!(Lineage::from_headers(&headers).attempt, 1);
        headers.set(header::ATTEMPT_COUNT, encode_i32(-4));
        assert_eq!(Lineage::from_headers(&headers).attempt, 1);
    }

    #[test]
    fn anchoring_keeps_existing_origin() {
        let record = Record::new("orders", 2, 50, "x");
        let fresh = Lineage::first().anchored_at(&record);
        assert_eq!(fresh.origin, Some(Origin { partition: 2, offset: 50 }));

        let earlier = Lineage { attempt: 2, origin: Some(Origin { partition: 0, offset: 7 }) };
        assert_eq!(earlier.anchored_at(&record).origin, earlier.origin);
    }

    #[test]
    fn big_endian_layout() {
        assert_eq!(encode_i32(1), vec![0, 0, 0, 1]);
        assert_eq!(encode_i64(258), vec![0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(decode_i32(&[0xff, 0xff, 0xff, 0xfe]), Some(-2));
        assert_eq!(decode_i64(&[0, 1]), None);
    }

    #[test]
    fn details_include_origin_when_known() {
        let record = Record::new("orders-retry", 0, 12, "x");
        let lineage = Lineage { attempt: 2, origin: Some(Origin { partition: 0, offset: 3 }) };
        let rendered = RecordDetails::new(&record, lineage, 3).to_string();
        assert_eq!(
            rendered,
            "topic: orders-retry, partition: 0, offset: 12, original partition: 0, \
             original offset: 3, attempt number: 2 of 3"
        );

        let rendered = RecordDetails::new(&record, Lineage::first(), 3).to_string();
        assert!(!rendered.contains("original"));
    }
}
