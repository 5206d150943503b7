//! Exception classifier.
//!
//! Maps a processing failure to [`ErrorClass::Retryable`] or [`ErrorClass::Fatal`] and picks the
//! diagnostic error that ends up in the forwarded record's headers.
//!
//! Kinds are matched by identity, never by message text:
//! - a [`ProcessingError`] is identified by its kind name
//! - any other error type is identified by its Rust type name, provided the type was registered
//!   (`register::<T>()` / `fatal_type::<T>()`)
//! - anything else resolves to [`UNKNOWN_KIND`]
//!
//! The listener wrapper is looked through: the verdict depends only on the kind of the error the
//! processor raised, never on its causes. Everything not on the allow-list is retryable.

use crate::error::{BoxError, ListenerFailure, ProcessingError};
use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Kind name reported for errors whose type was never registered.
pub const UNKNOWN_KIND: &str = "unknown";

type Matcher = fn(&(dyn StdError + 'static)) -> bool;

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Default: the failure may go away on a later attempt.
    Retryable,
    /// Explicitly marked permanent; retrying is pointless.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable => f.write_str("retryable"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// The most informative error in a causal chain, flattened for headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: String,
    /// Empty when the error had nothing to say.
    pub message: String,
    pub cause_kind: Option<String>,
}

/// Classifier verdict plus the diagnostic to publish with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: ErrorClass,
    pub diagnostic: Diagnostic,
}

impl Classification {
    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

#[derive(Clone)]
struct KnownType {
    name: &'static str,
    matches: Matcher,
}

/// Error classifier configured once at startup.
#[derive(Clone)]
pub struct Classifier {
    fatal_kinds: Arc<HashSet<String>>,
    known_types: Arc<Vec<KnownType>>,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fatal: Vec<&String> = self.fatal_kinds.iter().collect();
        fatal.sort();
        f.debug_struct("Classifier")
            .field("fatal_kinds", &fatal)
            .field("known_types", &self.known_types.iter().map(|t| t.name).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Classifier {
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder::new()
    }

    /// Classifier whose allow-list holds exactly `kinds`.
    pub fn with_fatal_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        kinds.into_iter().fold(Self::builder(), |b, k| b.fatal_kind(k)).build()
    }

    pub fn is_fatal_kind(&self, kind: &str) -> bool {
        self.fatal_kinds.contains(kind)
    }

    /// Kind name of a single error (not its chain).
    pub fn kind_of(&self, error: &(dyn StdError + 'static)) -> String {
        if let Some(processing) = error.downcast_ref::<ProcessingError>() {
            return processing.kind().to_string();
        }
        self.known_types
            .iter()
            .find(|t| (t.matches)(error))
            .map(|t| t.name.to_string())
            .unwrap_or_else(|| UNKNOWN_KIND.to_string())
    }

    /// Full classification: verdict plus diagnostic.
    pub fn classify(&self, error: &(dyn StdError + 'static)) -> Classification {
        let fatal = self.is_fatal_kind(&self.kind_of(raised(error)));
        let class = if fatal { ErrorClass::Fatal } else { ErrorClass::Retryable };
        Classification { class, diagnostic: self.select_diagnostic(error) }
    }

    /// Pick the diagnostic error: the first member of the processing-error family found walking
    /// inward from the raised error, or the raised error itself when the chain has none.
    ///
    /// Wrappers added by the listener boundary are looked through, so a processor that raises
    /// `Fatal(cause: Failure)` reports `Fatal` with cause kind `Failure`, and one that raises an
    /// `io::Error` reports the `io::Error`.
    pub fn select_diagnostic(&self, error: &(dyn StdError + 'static)) -> Diagnostic {
        let raised = raised(error);
        let selected = chain(raised).find(|e| e.is::<ProcessingError>()).unwrap_or(raised);
        Diagnostic {
            kind: self.kind_of(selected),
            message: selected.to_string(),
            cause_kind: selected.source().map(|cause| self.kind_of(cause)),
        }
    }
}

fn chain<'a>(
    error: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(error), |&e| e.source())
}

/// The error a processor raised, below any listener wrappers.
fn raised<'a>(mut error: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    while let Some(failure) = error.downcast_ref::<ListenerFailure>() {
        error = failure.inner();
    }
    error
}

/// Builder for [`Classifier`].
#[derive(Clone)]
pub struct ClassifierBuilder {
    fatal_kinds: HashSet<String>,
    known_types: Vec<KnownType>,
}

impl ClassifierBuilder {
    /// Builder pre-registered with the listener wrapper and common std/serde error types.
    pub fn new() -> Self {
        Self { fatal_kinds: HashSet::new(), known_types: Vec::new() }
            .register::<ListenerFailure>()
            .register::<std::io::Error>()
            .register::<std::fmt::Error>()
            .register::<std::str::Utf8Error>()
            .register::<std::string::FromUtf8Error>()
            .register::<std::num::ParseIntError>()
            .register::<serde_json::Error>()
    }

    /// Mark a kind name as fatal.
    pub fn fatal_kind(mut self, kind: impl Into<String>) -> Self {
        self.fatal_kinds.insert(kind.into());
        self
    }

    /// Mark several kind names as fatal.
    pub fn fatal_kinds<I, S>(self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        kinds.into_iter().fold(self, |b, k| b.fatal_kind(k))
    }

    /// Register an error type so its type name can be reported and matched.
    pub fn register<T>(mut self) -> Self
    where
        T: StdError + 'static,
    {
        let name = std::any::type_name::<T>();
        if !self.known_types.iter().any(|t| t.name == name) {
            self.known_types.push(KnownType { name, matches: is_type::<T> });
        }
        self
    }

    /// Register an error type and mark it fatal.
    pub fn fatal_type<T>(self) -> Self
    where
        T: StdError + 'static,
    {
        self.register::<T>().fatal_kind(std::any::type_name::<T>())
    }

    pub fn build(self) -> Classifier {
        Classifier {
            fatal_kinds: Arc::new(self.fatal_kinds),
            known_types: Arc::new(self.known_types),
        }
    }
}

impl Default for ClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_type<T: StdError + 'static>(error: &(dyn StdError + 'static)) -> bool {
    error.is::<T>()
}

/// Convenience for callers holding a boxed processor error.
pub fn classify_boxed(classifier: &Classifier, error: &BoxError) -> Classification {
    classifier.classify(&**error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TopicPartition;
    use std::io;

    const FAILURE: &str = "demo.ProcessingFailure";
    const FATAL: &str = "demo.ProcessingFatal";

    #[derive(Debug, thiserror::Error)]
    #[error("schema mismatch")]
    struct SchemaMismatch;

    fn wrap(inner: impl Into<BoxError>) -> ListenerFailure {
        ListenerFailure::new(TopicPartition::new("orders", 0), 3, inner.into())
    }

    #[test]
    fn unlisted_kinds_are_retryable() {
        let classifier = Classifier::with_fatal_kinds([FATAL]);
        let outcome = classifier.classify(&wrap(ProcessingError::new(FAILURE, "flaky")));
        assert_eq!(outcome.class, ErrorClass::Retryable);
        assert!(!outcome.is_fatal());
    }

    #[test]
    fn listed_kind_is_fatal_even_when_wrapped() {
        let classifier = Classifier::with_fatal_kinds([FATAL]);
        let outcome = classifier.classify(&wrap(ProcessingError::new(FATAL, "nope")));
        assert_eq!(outcome.class, ErrorClass::Fatal);
    }

    #[test]
    fn classification_ignores_message_text() {
        let classifier = Classifier::with_fatal_kinds([FATAL]);
        let outcome = classifier.classify(&wrap(ProcessingError::new(FAILURE, FATAL)));
        assert_eq!(outcome.class, ErrorClass::Retryable);
    }

    #[test]
    fn fatal_type_matches_by_type_identity() {
        let classifier = Classifier::builder().fatal_type::<SchemaMismatch>().build();
        let outcome = classifier.classify(&wrap(SchemaMismatch));
        assert!(outcome.is_fatal());
        assert!(outcome.diagnostic.kind.ends_with("SchemaMismatch"));
    }

    #[test]
    fn diagnostic_skips_listener_wrapper() {
        let classifier = Classifier::default();
        let err = ProcessingError::new(FATAL, "stop")
            .caused_by(ProcessingError::new(FAILURE, "foo bar reason"));
        let diagnostic = classifier.select_diagnostic(&wrap(err));
        assert_eq!(diagnostic.kind, FATAL);
        assert_eq!(diagnostic.message, "stop");
        assert_eq!(diagnostic.cause_kind.as_deref(), Some(FAILURE));
    }

    #[test]
    fn diagnostic_falls_back_to_raised_error() {
        let classifier = Classifier::default();
        let failure = wrap(io::Error::new(io::ErrorKind::Other, "disk gone"));
        let diagnostic = classifier.select_diagnostic(&failure);
        assert_eq!(diagnostic.kind, std::any::type_name::<io::Error>());
        assert_eq!(diagnostic.message, "disk gone");
        assert!(diagnostic.cause_kind.is_none());
    }

    #[test]
    fn nested_listener_wrappers_are_looked_through() {
        let classifier = Classifier::with_fatal_kinds([FATAL]);
        let failure = wrap(wrap(ProcessingError::new(FATAL, "stop")));
        let outcome = classifier.classify(&failure);
        assert!(outcome.is_fatal());
        assert_eq!(outcome.diagnostic.kind, FATAL);
    }

    #[test]
    fn unregistered_types_resolve_to_unknown() {
        let classifier = Classifier::default();
        let failure = wrap(SchemaMismatch);
        let diagnostic = classifier.select_diagnostic(&failure);
        assert_eq!(diagnostic.kind, UNKNOWN_KIND);
        assert_eq!(diagnostic.message, "schema mismatch");
    }

    #[test]
    fn bare_processing_error_has_empty_message_and_no_cause() {
        let classifier = Classifier::default();
        let diagnostic = classifier.select_diagnostic(&wrap(ProcessingError::bare(FAILURE)));
        assert_eq!(diagnostic.message, "");
        assert!(diagnostic.cause_kind.is_none());
    }

    #[test]
    fn fatal_cause_below_raised_error_stays_retryable() {
        let classifier = Classifier::with_fatal_kinds([FATAL]);
        let err = ProcessingError::new(FAILURE, "outer").caused_by(ProcessingError::bare(FATAL));
        let outcome = classify_boxed(&classifier, &(Box::new(wrap(err)) as BoxError));
        assert_eq!(outcome.class, ErrorClass::Retryable);
        assert_eq!(outcome.diagnostic.kind, FAILURE);
        assert_eq!(outcome.diagnostic.cause_kind.as_deref(), Some(FATAL));
    }

    #[test]
    fn register_is_idempotent() {
        let builder = ClassifierBuilder::new().register::<io::Error>().register::<io::Error>();
        let name = std::any::type_name::<io::Error>();
        let count = builder.known_types.iter().filter(|t| t.name == name).count();
        assert_eq!(count, 1);
    }
}
