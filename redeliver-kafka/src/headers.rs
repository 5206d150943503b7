//! Conversion between `rdkafka` messages and `redeliver` records.

use rdkafka::message::{Header, Headers as KafkaHeaders, Message, OwnedHeaders};
use redeliver::{Headers, Record};

/// Copy `headers` into an `OwnedHeaders`, keeping order and duplicates.
pub fn to_kafka_headers(headers: &Headers) -> OwnedHeaders {
    headers.iter().fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
        acc.insert(Header { key, value: Some(value) })
    })
}

/// Copy Kafka headers into [`Headers`]. Null-valued headers are dropped.
pub fn from_kafka_headers<H: KafkaHeaders>(headers: &H) -> Headers {
    let mut out = Headers::new();
    for header in headers.iter() {
        if let Some(value) = header.value {
            out.add(header.key, value.to_vec());
        }
    }
    out
}

/// Snapshot a consumed message as a [`Record`].
pub fn record_from_message<M: Message>(message: &M) -> Record {
    let mut record = Record::new(
        message.topic(),
        message.partition(),
        message.offset(),
        message.payload().unwrap_or_default().to_vec(),
    );
    if let Some(key) = message.key() {
        record = record.with_key(key.to_vec());
    }
    if let Some(headers) = message.headers() {
        record = record.with_headers(from_kafka_headers(headers));
    }
    if let Some(timestamp) = message.timestamp().to_millis() {
        record = record.with_timestamp(timestamp);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{OwnedMessage, Timestamp};

    #[test]
    fn headers_survive_the_trip_in_order() {
        let mut headers = Headers::new();
        headers.add("attempt-count", vec![0, 0, 0, 2]);
        headers.add("trace", b"a".to_vec());
        headers.add("trace", b"b".to_vec());

        let back = from_kafka_headers(&to_kafka_headers(&headers));

        assert_eq!(back, headers);
        assert_eq!(back.last("trace"), Some(&b"b"[..]));
    }

    #[test]
    fn message_becomes_record() {
        let headers = OwnedHeaders::new().insert(Header { key: "k", value: Some(&b"v"[..]) });
        let message = OwnedMessage::new(
            Some(b"payload".to_vec()),
            Some(b"key".to_vec()),
            "orders".to_string(),
            Timestamp::CreateTime(1_000),
            3,
            42,
            Some(headers),
        );

        let record = record_from_message(&message);

        assert_eq!(record.topic, "orders");
        assert_eq!((record.partition, record.offset), (3, 42));
        assert_eq!(record.key.as_deref(), Some(&b"key"[..]));
        assert_eq!(record.payload, b"payload".to_vec());
        assert_eq!(record.timestamp, Some(1_000));
        assert_eq!(record.headers.last_str("k").as_deref(), Some("v"));
    }
}
