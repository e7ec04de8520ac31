use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

use crate::digest::Digest;

/// Categorizes storage errors by their semantic meaning, independent of
/// the underlying storage backend implementation.
///
/// Absence of a blob, manifest or tag is not an error at the contract
/// boundary; `NotFound` is only raised where the medium itself is missing
/// (e.g. the storage root).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The storage medium or a required location on it was not found.
    NotFound,

    /// The process lacks permission to read or write the medium.
    PermissionDenied,

    /// The operation failed due to I/O errors (disk full, device gone, etc.).
    ///
    /// Never retried inside the storage engine; retry policy belongs to the caller.
    Io,

    /// Content does not hash to the digest the caller declared.
    ///
    /// Always fatal to the write, and nothing is persisted.
    DigestMismatch,

    /// A malformed digest, repository name, tag or reference.
    ///
    /// Raised before any I/O is attempted.
    InvalidArgument,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl StorageErrorKind {
    /// Returns whether this error indicates a client-side fault (bad request, invalid params).
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::InvalidArgument | StorageErrorKind::DigestMismatch
        )
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::DigestMismatch => write!(f, "digest mismatch"),
            StorageErrorKind::InvalidArgument => write!(f, "invalid argument"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Captured backtrace for debugging.
    ///
    /// Note: Backtrace capture is controlled by RUST_BACKTRACE environment variable.
    backtrace: Backtrace,

    /// Span context at the point where the error was created.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected {expected}, computed {actual}")]
struct DigestMismatch {
    expected: String,
    actual: String,
}

/// Storage error with semantic kind, operation context and captured traces.
///
/// # Example
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// fn read_tag() -> Result<(), StorageError> {
///     let result = std::fs::File::open("missing.txt");
///
///     match result {
///         Err(err) => Err(StorageError::builder("local", StorageErrorKind::NotFound, err)
///             .repository("library/alpine")
///             .path("_tags/latest")
///             .build()),
///         Ok(_) => Ok(()),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,

    /// The name of the storage engine that produced this error.
    engine: &'static str,

    repository: Option<String>,

    path: Option<String>,

    context: Option<String>,

    source: Box<dyn StdError + Send + Sync + 'static>,

    traces: Box<ErrorTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// Create a new storage error with the minimum required information.
    ///
    /// For more control, use `StorageError::builder()`.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            repository: None,
            path: None,
            context: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create a builder for constructing a storage error with full context.
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            engine,
            kind,
            source: error.into(),
            repository: None,
            path: None,
            context: None,
        }
    }

    /// Returns a boxed closure that creates a storage error from a downstream error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use storage_driver::{StorageError, StorageErrorKind};
    ///
    /// fn operation() -> Result<(), StorageError> {
    ///     std::fs::File::open("file.txt")
    ///         .map_err(StorageError::with("local", StorageErrorKind::Io))?;
    ///     Ok(())
    /// }
    /// ```
    pub fn with<E>(
        engine: &'static str,
        kind: StorageErrorKind,
    ) -> Box<dyn FnOnce(E) -> StorageError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| StorageError::new(engine, kind, error))
    }

    /// Classify an I/O error by its kind.
    pub fn from_io(engine: &'static str, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        };
        StorageError::new(engine, kind, err)
    }

    /// Content hashed to `actual` where `expected` was declared.
    pub fn digest_mismatch(expected: &Digest, actual: &Digest) -> Self {
        StorageError::new(
            "digest",
            StorageErrorKind::DigestMismatch,
            DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
        )
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Returns the storage engine name.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the repository, if available.
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Returns the file path, if available.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Returns additional context, if available.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns whether this error indicates a client-side fault.
    pub fn is_client_fault(&self) -> bool {
        self.kind.is_client_fault()
    }

    /// Attach the repository the failed operation worked on, unless one is
    /// already set.
    pub fn in_repository(mut self, repository: &str) -> Self {
        if self.repository.is_none() {
            self.repository = Some(repository.to_owned());
        }
        self
    }

    /// Attach the path the failed operation touched.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a short description of the failed operation.
    pub fn during(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns a reference to the captured span trace.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage error [{}] from {}", self.kind, self.engine)?;

        if let Some(repository) = &self.repository {
            write!(f, " (repository: {})", repository)?;
        }

        if let Some(path) = &self.path {
            write!(f, " (path: {})", path)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for constructing `StorageError` with optional context fields.
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    repository: Option<String>,
    path: Option<String>,
    context: Option<String>,
}

impl StorageErrorBuilder {
    /// Set the repository name.
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Set the file path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the `StorageError`.
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            repository: self.repository,
            path: self.path,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let err = StorageError::from_io(
            "local",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), StorageErrorKind::NotFound);

        let err = StorageError::from_io(
            "local",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.kind(), StorageErrorKind::PermissionDenied);

        let err = StorageError::from_io("local", std::io::Error::other("disk full"));
        assert_eq!(err.kind(), StorageErrorKind::Io);
        assert!(!err.is_client_fault());
    }

    #[test]
    fn display_includes_context() {
        let err = StorageError::builder(
            "local",
            StorageErrorKind::Io,
            std::io::Error::other("boom"),
        )
        .repository("myorg/backend")
        .path("_tags/latest")
        .context("write tag")
        .build();

        assert_eq!(
            err.to_string(),
            "Storage error [I/O error] from local (repository: myorg/backend) \
             (path: _tags/latest) (write tag): boom"
        );
    }

    #[test]
    fn repository_is_kept_once_set() {
        let err = StorageError::from_io("local", std::io::Error::other("boom"))
            .in_repository("alpine")
            .in_repository("debian");
        assert_eq!(err.repository(), Some("alpine"));
    }

    #[test]
    fn span_trace_records_enclosing_span() {
        use tracing_error::{ErrorLayer, SpanTraceStatus};
        use tracing_subscriber::layer::SubscriberExt;

        let subscriber = tracing_subscriber::registry().with(ErrorLayer::default());
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("link_blob");
            let _entered = span.enter();

            let err = StorageError::from_io("local", std::io::Error::other("boom"));
            assert_eq!(err.span_trace().status(), SpanTraceStatus::CAPTURED);
            assert!(err.span_trace().to_string().contains("link_blob"));
        });
    }

    #[test]
    fn digest_mismatch_names_both_digests() {
        let expected = Digest::sha256(b"a");
        let actual = Digest::sha256(b"b");
        let err = StorageError::digest_mismatch(&expected, &actual);
        assert_eq!(err.kind(), StorageErrorKind::DigestMismatch);
        assert!(err.is_client_fault());
        assert!(err.to_string().contains(&expected.to_string()));
        assert!(err.to_string().contains(&actual.to_string()));
    }
}
