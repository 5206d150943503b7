use super::events::{AttemptEvent, EngineEvent, ForwardEvent};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

type SinkFuture<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

fn done() -> SinkFuture<Infallible> {
    Box::pin(std::future::ready(Ok(())))
}

/// Consumer of [`EngineEvent`]s.
pub trait TelemetrySink:
    tower::Service<EngineEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Deliver `event` once `sink` is ready. Readiness and call errors are dropped so telemetry never
/// changes how a record is routed.
pub async fn emit_best_effort<S>(sink: S, event: EngineEvent)
where
    S: tower::Service<EngineEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    match sink.ready_oneshot().await {
        Ok(mut sink) => {
            if let Err(e) = sink.call(event).await {
                tracing::trace!(error = %e, "telemetry sink rejected event");
            }
        }
        Err(e) => tracing::trace!(error = %e, "telemetry sink not ready"),
    }
}

/// Discards every event. The engine's sink until one is configured.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<EngineEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: EngineEvent) -> Self::Future {
        done()
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Writes events through `tracing`.
///
/// Successful attempts log at debug, forwards at info, failed attempts and failed forwards at
/// warn.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl LogSink {
    fn log(event: &EngineEvent) {
        match event {
            EngineEvent::Attempt(AttemptEvent::Succeeded { source, offset, attempt, .. }) => {
                tracing::debug!(%source, offset, attempt, "record processed");
            }
            EngineEvent::Attempt(AttemptEvent::Failed {
                source, offset, attempt, class, kind, ..
            }) => {
                tracing::warn!(%source, offset, attempt, %class, kind = %kind, "attempt failed");
            }
            EngineEvent::Forward(ForwardEvent::Forwarded {
                source, offset, topic, attempt, reason, ..
            }) => {
                tracing::info!(%source, offset, topic = %topic, attempt, %reason, "forwarded");
            }
            EngineEvent::Forward(ForwardEvent::PublishFailed { source, offset, topic, error }) => {
                tracing::warn!(%source, offset, topic = %topic, error = %error, "forward failed");
            }
        }
    }
}

impl Service<EngineEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: EngineEvent) -> Self::Future {
        Self::log(&event);
        done()
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory. Clones share the buffer.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<EngineEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Sink keeping at most `capacity` events; older ones are evicted first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<EngineEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.buffer().iter().cloned().collect()
    }

    /// Retained events accepted by `filter`.
    pub fn count(&self, filter: impl Fn(&EngineEvent) -> bool) -> usize {
        self.buffer().iter().filter(|event| filter(event)).count()
    }

    pub fn clear(&self) {
        self.buffer().clear();
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<EngineEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: EngineEvent) -> Self::Future {
        let mut buffer = self.buffer();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(event);
        done()
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// Latch over engine events.
///
/// Counts the events its filter accepts (processing attempts by default) and lets a caller
/// wait until a number of them has been observed.
#[derive(Clone)]
pub struct CountdownSink {
    expected: usize,
    seen: Arc<tokio::sync::watch::Sender<usize>>,
    filter: fn(&EngineEvent) -> bool,
}

impl std::fmt::Debug for CountdownSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownSink")
            .field("expected", &self.expected)
            .field("observed", &self.observed())
            .finish()
    }
}

impl CountdownSink {
    /// Latch released after `expected` processing attempts.
    pub fn new(expected: usize) -> Self {
        Self::matching(expected, EngineEvent::is_attempt)
    }

    /// Latch released after `expected` successful forwards.
    pub fn forwards(expected: usize) -> Self {
        Self::matching(expected, EngineEvent::is_forwarded)
    }

    /// Latch released after `expected` events accepted by `filter`.
    pub fn matching(expected: usize, filter: fn(&EngineEvent) -> bool) -> Self {
        let (seen, _) = tokio::sync::watch::channel(0);
        Self { expected, seen: Arc::new(seen), filter }
    }

    /// Matching events observed so far.
    pub fn observed(&self) -> usize {
        *self.seen.borrow()
    }

    /// How many matching events are still outstanding.
    pub fn remaining(&self) -> usize {
        self.expected.saturating_sub(self.observed())
    }

    /// Wait until the latch is released. Returns `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.wait_for(self.expected, timeout).await
    }

    /// Wait until at least `count` matching events were observed. Returns `false` on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.seen.subscribe();
        let released = tokio::time::timeout(timeout, rx.wait_for(|seen| *seen >= count)).await;
        matches!(released, Ok(Ok(_)))
    }
}

impl Service<EngineEvent> for CountdownSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: EngineEvent) -> Self::Future {
        if (self.filter)(&event) {
            self.seen.send_modify(|seen| *seen += 1);
        }
        done()
    }
}

impl TelemetrySink for CountdownSink {
    type SinkError = Infallible;
}

/// Failure reported by one side of a [`MulticastSink`].
#[derive(Debug, thiserror::Error)]
#[error("telemetry sink error: {0}")]
pub struct ComposedSinkError(#[source] Box<dyn std::error::Error + Send + Sync>);

/// Sends every event to two sinks concurrently.
///
/// The first error seen is reported; the other sink still receives the event.
#[derive(Clone, Debug)]
pub struct MulticastSink<A, B> {
    first: A,
    second: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> Service<EngineEvent> for MulticastSink<A, B>
where
    A: tower::Service<EngineEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<EngineEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = ComposedSinkError;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: EngineEvent) -> Self::Future {
        let first = self.first.call(event.clone());
        let second = self.second.call(event);

        Box::pin(async move {
            let (a, b) = tokio::join!(first, second);
            a.map_err(|e| ComposedSinkError(Box::new(e)))?;
            b.map_err(|e| ComposedSinkError(Box::new(e)))
        })
    }
}

impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: tower::Service<EngineEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<EngineEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type SinkError = ComposedSinkError;
}
