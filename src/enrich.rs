//! Header enricher: builds the header set of a forwarded record.
//!
//! Starting from the inbound headers:
//! - every diagnostic header from an earlier hop is removed, so at most one generation exists
//! - `exception-kind` is always written
//! - `exception-message` only when the diagnostic message is non-empty
//! - `exception-cause-kind` only when the diagnostic has a cause
//! - `attempt-count` is replaced by the next hop's attempt number
//! - `original-partition` / `original-offset` / `original-topic` are written on the first failure
//!   hop and passed through untouched afterwards
//!
//! Pure; no I/O.

use crate::classify::Diagnostic;
use crate::lineage::{encode_i32, encode_i64, header, Lineage};
use crate::record::Headers;

/// Build the headers for a forwarded record.
///
/// `next` is the lineage of the hop being produced (see [`crate::router::Hop::lineage`]); its
/// attempt number becomes the `attempt-count` header and its origin seeds the original-position
/// headers when `previous` does not carry them yet. `origin_topic` names the topic of the first
/// appearance.
pub fn build_forward_headers(
    previous: &Headers,
    next: &Lineage,
    origin_topic: &str,
    diagnostic: &Diagnostic,
) -> Headers {
    let mut headers = previous.clone();

    for name in header::DIAGNOSTIC {
        headers.remove(name);
    }
    headers.add(header::EXCEPTION_KIND, diagnostic.kind.as_bytes().to_vec());
    if !diagnostic.message.is_empty() {
        headers.add(header::EXCEPTION_MESSAGE, diagnostic.message.as_bytes().to_vec());
    }
    if let Some(cause) = &diagnostic.cause_kind {
        headers.add(header::EXCEPTION_CAUSE_KIND, cause.as_bytes().to_vec());
    }

    let attempt = i32::try_from(next.attempt).unwrap_or(i32::MAX);
    headers.set(header::ATTEMPT_COUNT, encode_i32(attempt));

    let has_origin =
        previous.contains(header::ORIGINAL_PARTITION) && previous.contains(header::ORIGINAL_OFFSET);
    if !has_origin {
        if let Some(origin) = next.origin {
            headers.set(header::ORIGINAL_PARTITION, encode_i32(origin.partition));
            headers.set(header::ORIGINAL_OFFSET, encode_i64(origin.offset));
        }
    }
    if !previous.contains(header::ORIGINAL_TOPIC) {
        headers.set(header::ORIGINAL_TOPIC, origin_topic.as_bytes().to_vec());
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::{decode_i32, decode_i64, Origin};

    fn diagnostic(kind: &str, message: &str, cause: Option<&str>) -> Diagnostic {
        Diagnostic {
            kind: kind.to_string(),
            message: message.to_string(),
            cause_kind: cause.map(str::to_string),
        }
    }

    fn next(attempt: u32) -> Lineage {
        Lineage { attempt, origin: Some(Origin { partition: 1, offset: 42 }) }
    }

    #[test]
    fn first_hop_writes_lineage_and_diagnostics() {
        let headers = build_forward_headers(
            &Headers::new(),
            &next(2),
            "orders",
            &diagnostic("demo.Failure", "boom", Some("std::io::Error")),
        );

        assert_eq!(headers.last(header::ATTEMPT_COUNT).and_then(decode_i32), Some(2));
        assert_eq!(headers.last(header::ORIGINAL_PARTITION).and_then(decode_i32), Some(1));
        assert_eq!(headers.last(header::ORIGINAL_OFFSET).and_then(decode_i64), Some(42));
        assert_eq!(headers.last_str(header::ORIGINAL_TOPIC).as_deref(), Some("orders"));
        assert_eq!(headers.last_str(header::EXCEPTION_KIND).as_deref(), Some("demo.Failure"));
        assert_eq!(headers.last_str(header::EXCEPTION_MESSAGE).as_deref(), Some("boom"));
        assert_eq!(
            headers.last_str(header::EXCEPTION_CAUSE_KIND).as_deref(),
            Some("std::io::Error")
        );
    }

    #[test]
    fn stale_diagnostics_never_linger() {
        let first = build_forward_headers(
            &Headers::new(),
            &next(2),
            "orders",
            &diagnostic("demo.Fatal", "first", Some("demo.Failure")),
        );
        let retryable = diagnostic("demo.Failure", "", None);
        let second = build_forward_headers(&first, &next(3), "orders", &retryable);

        for name in header::DIAGNOSTIC {
            assert!(second.count(name) <= 1, "{name} duplicated");
        }
        assert_eq!(second.last_str(header::EXCEPTION_KIND).as_deref(), Some("demo.Failure"));
        assert!(!second.contains(header::EXCEPTION_MESSAGE));
        assert!(!second.contains(header::EXCEPTION_CAUSE_KIND));
        assert_eq!(second.count(header::ATTEMPT_COUNT), 1);
        assert_eq!(second.last(header::ATTEMPT_COUNT).and_then(decode_i32), Some(3));
    }

    #[test]
    fn existing_origin_passes_through_unchanged() {
        let mut previous = Headers::new();
        previous.add(header::ORIGINAL_PARTITION, encode_i32(7));
        previous.add(header::ORIGINAL_OFFSET, encode_i64(700));
        previous.add(header::ORIGINAL_TOPIC, b"orders".to_vec());

        let headers = build_forward_headers(
            &previous,
            &next(3),
            "orders-retry",
            &diagnostic("demo.Failure", "x", None),
        );

        assert_eq!(headers.last(header::ORIGINAL_PARTITION).and_then(decode_i32), Some(7));
        assert_eq!(headers.last(header::ORIGINAL_OFFSET).and_then(decode_i64), Some(700));
        assert_eq!(headers.last_str(header::ORIGINAL_TOPIC).as_deref(), Some("orders"));
    }

    #[test]
    fn unrelated_headers_are_preserved() {
        let mut previous = Headers::new();
        previous.add("trace-id", b"abc".to_vec());
        let headers =
            build_forward_headers(&previous, &next(2), "orders", &diagnostic("k", "m", None));
        assert_eq!(headers.last_str("trace-id").as_deref(), Some("abc"));
    }

    #[test]
    fn previous_headers_are_not_mutated() {
        let mut previous = Headers::new();
        previous.add(header::EXCEPTION_KIND, b"old".to_vec());
        let snapshot = previous.clone();
        let _ = build_forward_headers(&previous, &next(2), "orders", &diagnostic("k", "m", None));
        assert_eq!(previous, snapshot);
    }
}
