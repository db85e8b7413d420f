//! Error taxonomy for ballast clients.
//!
//! Every failure that crosses a crate boundary is a [`ClientError`] tagged
//! with an [`ErrorKind`]. Retry and circuit-breaker policy reason about
//! kinds, never about concrete transport error types; raw errors are mapped
//! onto kinds by an ordered [`ClassifierChain`].

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Category of a client failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unclassified failure.
    General,
    /// Invalid or missing configuration.
    Configuration,
    /// Same-server retries were exhausted.
    NumberOfRetriesExceeded,
    /// Next-server retries were exhausted.
    NumberOfRetriesNextServerExceeded,
    /// Connection-level timeout.
    SocketTimeout,
    /// Read deadline expired after the connection was established.
    ReadTimeout,
    /// Connection broke mid-flight.
    SocketError,
    /// Hostname could not be resolved.
    UnknownHost,
    /// Connection could not be established.
    ConnectError,
    /// Rejected locally before dispatch.
    ClientThrottled,
    /// Rejected by the server (e.g. HTTP 429/503).
    ServerThrottled,
    /// No route to the target host.
    NoRouteToHost,
    /// Expected cache entry was missing.
    CacheMissing,
    /// Caller demanded immediate termination; never retried.
    AbortExecution,
}

impl ErrorKind {
    /// Stable human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::General => "General",
            ErrorKind::Configuration => "Configuration",
            ErrorKind::NumberOfRetriesExceeded => "NumberOfRetriesExceeded",
            ErrorKind::NumberOfRetriesNextServerExceeded => "NumberOfRetriesNextServerExceeded",
            ErrorKind::SocketTimeout => "SocketTimeout",
            ErrorKind::ReadTimeout => "ReadTimeout",
            ErrorKind::SocketError => "SocketError",
            ErrorKind::UnknownHost => "UnknownHost",
            ErrorKind::ConnectError => "ConnectError",
            ErrorKind::ClientThrottled => "ClientThrottled",
            ErrorKind::ServerThrottled => "ServerThrottled",
            ErrorKind::NoRouteToHost => "NoRouteToHost",
            ErrorKind::CacheMissing => "CacheMissing",
            ErrorKind::AbortExecution => "AbortExecution",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified client failure, optionally wrapping the error that caused it.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ClientError {
    /// A failure with no underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// A failure caused by another error.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Re-tag an existing failure, keeping it as the cause.
    pub fn wrap(kind: ErrorKind, cause: ClientError) -> Self {
        Self {
            kind,
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Maps a raw error to an [`ErrorKind`].
///
/// Return `None` to pass the error to the next classifier in the chain.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &(dyn StdError + 'static)) -> Option<ErrorKind>;
}

/// Ordered classifier chain with a built-in I/O fallback.
///
/// Custom classifiers run first in registration order; the first `Some`
/// wins. Errors nobody claims fall through to [`io::Error`] heuristics and
/// finally to [`ErrorKind::General`].
#[derive(Default)]
pub struct ClassifierChain {
    classifiers: Vec<Box<dyn ErrorClassifier>>,
}

impl ClassifierChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a classifier; earlier entries take precedence.
    pub fn with(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifiers.push(Box::new(classifier));
        self
    }

    /// Classify an error without consuming it.
    pub fn classify(&self, error: &(dyn StdError + 'static)) -> ErrorKind {
        for classifier in &self.classifiers {
            if let Some(kind) = classifier.classify(error) {
                return kind;
            }
        }
        default_classify(error)
    }

    /// Convert a raw error into a [`ClientError`], preserving it as the cause.
    pub fn convert(&self, error: Box<dyn StdError + Send + Sync>) -> ClientError {
        let kind = self.classify(error.as_ref());
        ClientError::with_source(kind, error.to_string(), error)
    }
}

/// Fallback classification: walk the cause chain looking for something
/// recognizable, then give up with `General`.
///
/// A nested [`ClientError`] wins over any I/O wrapper around it, and an
/// outer catch-all `io::Error` defers to a more specific one underneath.
fn default_classify(error: &(dyn StdError + 'static)) -> ErrorKind {
    let mut io_kind: Option<ErrorKind> = None;
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(client) = err.downcast_ref::<ClientError>() {
            return client.kind();
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            let kind = classify_io(io_err);
            if io_kind.is_none() || io_kind == Some(ErrorKind::General) {
                io_kind = Some(kind);
            }
        }
        current = err.source();
    }
    io_kind.unwrap_or(ErrorKind::General)
}

fn classify_io(error: &io::Error) -> ErrorKind {
    match error.kind() {
        io::ErrorKind::TimedOut => ErrorKind::SocketTimeout,
        io::ErrorKind::WouldBlock => ErrorKind::ReadTimeout,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected => ErrorKind::ConnectError,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ErrorKind::SocketError,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ErrorKind::NoRouteToHost
        }
        io::ErrorKind::AddrNotAvailable => ErrorKind::UnknownHost,
        _ => ErrorKind::General,
    }
}
