//! Message processor: the pluggable business logic.
//!
//! The engine only sees the outcome. Any error type may be raised; raise a
//! [`ProcessingError`] to control the kind name the classifier and the diagnostic headers use.
//!
//! ```rust
//! use redeliver::processor::{processor_fn, Processor};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let upper = processor_fn(|payload: Vec<u8>| async move { Ok(payload.to_ascii_uppercase()) });
//! assert_eq!(upper.process(b"abc".to_vec()).await.unwrap(), b"ABC".to_vec());
//! # }
//! ```

use crate::error::{BoxError, ProcessingError};
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Transforms a payload or fails.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxError>;
}

#[async_trait]
impl<P> Processor for Arc<P>
where
    P: Processor + ?Sized,
{
    async fn process(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        (**self).process(payload).await
    }
}

/// Closure-backed [`Processor`]; see [`processor_fn`].
#[derive(Clone)]
pub struct FnProcessor<F> {
    f: F,
}

impl<F> fmt::Debug for FnProcessor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProcessor").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`Processor`].
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send,
{
    FnProcessor { f }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send,
{
    async fn process(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        (self.f)(payload).await
    }
}

/// Kind raised by [`RiskyTruncate`] for an ordinary (retryable) failure.
pub const PROCESSING_FAILURE: &str = "redeliver.ProcessingFailure";
/// Kind raised by [`RiskyTruncate`] when the failure is permanent.
pub const PROCESSING_FATAL: &str = "redeliver.ProcessingFatal";

/// Longest payload passed through untouched.
pub const TRUNCATE_AT: usize = 5;

/// Reference processor: shortens long payloads and fails at random.
///
/// Payloads longer than [`TRUNCATE_AT`] characters become their first five characters followed by
/// `...`. A share of calls (`error_percentage`, 0-100) fails with [`PROCESSING_FAILURE`]; when
/// `fatal` is set the failure is raised as [`PROCESSING_FATAL`] wrapping the ordinary failure,
/// so the dead-letter record carries both kinds.
#[derive(Debug, Clone, Copy)]
pub struct RiskyTruncate {
    error_percentage: u8,
    fatal: bool,
}

impl RiskyTruncate {
    pub fn new(error_percentage: u8) -> Self {
        Self { error_percentage: error_percentage.min(100), fatal: false }
    }

    /// Raise failures as fatal.
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn error_percentage(&self) -> u8 {
        self.error_percentage
    }

    fn should_fail(&self) -> bool {
        match self.error_percentage {
            0 => false,
            100 => true,
            pct => rand::rng().random_range(0..100u8) < pct,
        }
    }

    fn failure(&self, payload: &str) -> ProcessingError {
        let failure = ProcessingError::new(
            PROCESSING_FAILURE,
            format!("Processing failure. Message: {payload}"),
        );
        if self.fatal {
            ProcessingError::new(PROCESSING_FATAL, format!("Fatal failure. Message: {payload}"))
                .caused_by(failure)
        } else {
            failure
        }
    }
}

/// First [`TRUNCATE_AT`] characters plus `...` for longer input; short input is returned as-is.
pub fn truncate(payload: &str) -> String {
    match payload.char_indices().nth(TRUNCATE_AT) {
        Some((cut, _)) => format!("{}...", &payload[..cut]),
        None => payload.to_string(),
    }
}

#[async_trait]
impl Processor for RiskyTruncate {
    async fn process(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        let text = String::from_utf8(payload)?;
        if self.should_fail() {
            return Err(Box::new(self.failure(&text)));
        }
        Ok(truncate(&text).into_bytes())
    }
}
