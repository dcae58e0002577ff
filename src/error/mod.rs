//! Error types for mirror operations
//!
//! Every failure inside a run is attributed to a (source, destination) pair and
//! collected into an [`AggregateError`] instead of aborting sibling work.

pub mod handlers;

use std::fmt;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MirrorError {
    /// Source or destination unreachable
    #[error("Connection error: {0}")]
    Connection(String),
    /// Tag to digest lookup failed
    #[error("Resolution error: {0}")]
    Resolution(String),
    /// Manifest fetch, decode or filter failure
    #[error("Manifest error: {0}")]
    Manifest(String),
    /// Mount or upload failure
    #[error("Blob transfer error: {0}")]
    BlobTransfer(String),
    /// A mount returned a different digest than requested
    #[error("Digest mismatch: requested {expected}, registry returned {actual}")]
    DigestMismatch { expected: String, actual: String },
    /// Push failed after blobs were transferred
    #[error("Manifest push error: {0}")]
    ManifestPush(String),
    /// Capability intentionally not implemented by a backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// Invalid mappings or options, detected before any network activity
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl MirrorError {
    /// Short stable name of the error kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorError::Connection(_) => "connection",
            MirrorError::Resolution(_) => "resolution",
            MirrorError::Manifest(_) => "manifest",
            MirrorError::BlobTransfer(_) | MirrorError::DigestMismatch { .. } => "blob-transfer",
            MirrorError::ManifestPush(_) => "manifest-push",
            MirrorError::Unsupported(_) => "unsupported",
            MirrorError::Configuration(_) => "configuration",
            MirrorError::Network(_) => "network",
            MirrorError::Http { .. } => "http",
            MirrorError::NotFound(_) => "not-found",
            MirrorError::AlreadyExists(_) => "already-exists",
            MirrorError::Parse(_) => "parse",
            MirrorError::Io(_) => "io",
            MirrorError::Cancelled => "cancelled",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MirrorError::NotFound(_) | MirrorError::Http { status: 404, .. }
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, MirrorError::AlreadyExists(_))
    }

    /// Re-labels plumbing errors with the workflow stage they happened in.
    /// Errors that already carry a stage-specific kind are kept as they are.
    pub fn in_stage(self, stage: fn(String) -> MirrorError) -> MirrorError {
        match self {
            MirrorError::Network(_)
            | MirrorError::Http { .. }
            | MirrorError::NotFound(_)
            | MirrorError::Parse(_)
            | MirrorError::Io(_) => stage(self.to_string()),
            other => other,
        }
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        MirrorError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}

impl From<url::ParseError> for MirrorError {
    fn from(err: url::ParseError) -> Self {
        MirrorError::Configuration(err.to_string())
    }
}

impl From<regex::Error> for MirrorError {
    fn from(err: regex::Error) -> Self {
        MirrorError::Configuration(format!("invalid pattern: {}", err))
    }
}

/// A single failed mapping, attributed to the pair it belongs to
#[derive(Debug, Clone)]
pub struct MappingFailure {
    pub source: String,
    pub destination: String,
    pub cause: MirrorError,
}

impl MappingFailure {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, cause: MirrorError) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            cause,
        }
    }
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.destination.is_empty() {
            write!(f, "{}: {}", self.source, self.cause)
        } else {
            write!(f, "{} -> {}: {}", self.source, self.destination, self.cause)
        }
    }
}

/// All failures of one run, flattened
#[derive(Debug, Clone, Default)]
pub struct AggregateError {
    pub failures: Vec<MappingFailure>,
}

impl AggregateError {
    pub fn new(failures: Vec<MappingFailure>) -> Self {
        Self { failures }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}", self.failures[0]),
            n => {
                write!(f, "{} errors occurred:", n)?;
                for failure in &self.failures {
                    write!(f, "\n  * {}", failure)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AggregateError {}
