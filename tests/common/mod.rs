#![allow(dead_code)]

use redeliver::broker::InMemoryBroker;
use redeliver::error::{BoxError, ProcessingError};
use redeliver::lineage::{decode_i32, decode_i64, header};
use redeliver::telemetry::TelemetrySink;
use redeliver::{ListenerContainer, ListenerHandle, Processor, Record, RetryEngine, RetryPolicy};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const FAILURE: &str = "test.TransientFailure";
pub const FATAL: &str = "test.FatalFailure";

pub fn policy(max_attempts: u32, interval: Duration) -> RetryPolicy {
    RetryPolicy::builder()
        .main_topic("orders")
        .retry_topic_suffix("-retry")
        .dlq_topic_suffix("-dlt")
        .interval(interval)
        .max_attempts(max_attempts)
        .build()
        .expect("valid policy")
}

type Script = dyn Fn(usize, &[u8]) -> Result<Vec<u8>, BoxError> + Send + Sync;

/// Processor driven by a script of `(call index, payload) -> outcome`, recording every call.
#[derive(Clone)]
pub struct Scripted {
    calls: Arc<Mutex<Vec<(Instant, Vec<u8>)>>>,
    script: Arc<Script>,
}

impl Scripted {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(usize, &[u8]) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    {
        Self { calls: Arc::default(), script: Arc::new(script) }
    }

    /// Fails every call with `kind`.
    pub fn always(kind: &'static str) -> Self {
        Self::new(move |_, payload| {
            let text = String::from_utf8_lossy(payload).into_owned();
            Err(ProcessingError::new(kind, format!("cannot handle {text}")).into())
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait::async_trait]
impl Processor for Scripted {
    async fn process(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), payload.clone()));
            calls.len() - 1
        };
        (self.script)(index, &payload)
    }
}

pub async fn listen<S>(engine: RetryEngine<S>, broker: &InMemoryBroker) -> ListenerHandle
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    ListenerContainer::new(Arc::new(engine))
        .with_redelivery_pause(Duration::from_millis(20))
        .start(Arc::new(broker.clone()))
        .await
        .expect("listener starts")
}

pub fn attempt_count(record: &Record) -> Option<i32> {
    record.headers.last(header::ATTEMPT_COUNT).and_then(decode_i32)
}

pub fn origin(record: &Record) -> (Option<i32>, Option<i64>) {
    (
        record.headers.last(header::ORIGINAL_PARTITION).and_then(decode_i32),
        record.headers.last(header::ORIGINAL_OFFSET).and_then(decode_i64),
    )
}
