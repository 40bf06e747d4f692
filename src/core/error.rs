use crate::collections::ListError;
use thiserror::Error;

/// Core error types for zonefw
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid argument handed to the core (programmer error)
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// Container-layer failure (stale handle, empty list)
    #[error("Container error: {0}")]
    Container(#[from] ListError),

    /// Malformed rule line or option string
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Semantically invalid input
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Named object does not exist
    #[error("{what} '{name}' not found")]
    NotFound { what: &'static str, name: String },

    /// Named object already exists
    #[error("{what} '{name}' already exists")]
    AlreadyExists { what: &'static str, name: String },

    /// Delete/rename blocked by holders of the object
    #[error("{what} '{name}' is still referenced: {holders}")]
    StillReferenced {
        what: &'static str,
        name: String,
        holders: String,
    },

    /// Storage protocol failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration file could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource exhaustion (allocation, table capacity)
    #[error("Resource error: {0}")]
    Resource(String),
}

/// Error classes callers act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    /// Bad arguments; fatal to the call
    Parameter,
    /// Malformed input line; skipped during bulk loads
    Parse,
    /// Semantically invalid input; skipped during bulk loads
    Validation,
    /// Operation refused because the object is still in use
    ReferentialIntegrity,
    /// Storage engine failure, propagated to the caller
    Backend,
    /// Allocation/capacity failure; always fatal
    Resource,
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parameter(_)
            | Error::Container(_)
            | Error::AlreadyExists { .. }
            | Error::Config(_) => ErrorKind::Parameter,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Validation { .. } | Error::NotFound { .. } => ErrorKind::Validation,
            Error::StillReferenced { .. } => ErrorKind::ReferentialIntegrity,
            Error::Backend(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Backend,
            Error::Resource(_) => ErrorKind::Resource,
        }
    }

    /// `true` for errors a bulk load logs and skips instead of aborting on
    pub fn is_skippable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Parse | ErrorKind::Validation)
    }
}

/// Rule line and options micro-language errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty rule line")]
    Empty,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("expected '{expected}', found '{found}'")]
    Expected {
        expected: &'static str,
        found: String,
    },

    #[error("missing value for '{0}'")]
    MissingOperand(&'static str),

    #[error("unexpected trailing input '{0}'")]
    Trailing(String),

    #[error("unbalanced quotes in options '{0}'")]
    UnbalancedQuotes(String),

    #[error("invalid value for option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Storage protocol errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("backend '{0}' is not loaded")]
    NotLoaded(String),

    #[error("{category} is not open for writing")]
    NotOpen { category: String },

    #[error("object '{name}' not found in {category}")]
    NoSuchObject { name: String, category: String },

    #[error("object '{name}' already exists in {category}")]
    ObjectExists { name: String, category: String },

    #[error("object '{name}' in {category} has children; recursive delete required")]
    HasChildren { name: String, category: String },

    #[error("timed out after {secs}s waiting for lock {path}")]
    LockTimeout { path: String, secs: u64 },

    #[error("corrupt entry in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
