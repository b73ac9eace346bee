//! Error type definitions for the source refresh scheduler
//!
//! Every failure in this crate degrades to "try again next tick" for the
//! scheduler; these types exist so callers of the outward API can tell the
//! categories apart.

use std::time::Duration;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Authoritative source store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Job backend (dispatch / status) errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Errors raised by a `SourceStore` implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached at all
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// Filesystem failures for file-backed stores
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be decoded
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// Data could not be encoded for writing
    #[error("Failed to encode {path}: {message}")]
    Encode { path: String, message: String },
}

/// Errors raised while submitting or querying jobs
#[derive(Error, Debug)]
pub enum BackendError {
    /// The call did not complete within the bounded timeout
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Transport level HTTP failures
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered but refused the request
    #[error("Backend rejected request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The configured endpoint cannot carry a job path
    #[error("Invalid backend endpoint: {url}")]
    InvalidEndpoint { url: String },

    /// The backend is not accepting work
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors describing malformed source records
#[derive(Error, Debug)]
pub enum SourceError {
    /// The refresh interval cannot be represented as a duration
    #[error("Invalid refresh interval for source {source_id}: {minutes} minutes")]
    InvalidInterval { source_id: String, minutes: i64 },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl StoreError {
    /// Create an unavailable error
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an encode error
    pub fn encode<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::Encode {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl BackendError {
    /// Create a timeout error
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Create an unavailable error
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Whether the failure happened before the backend could answer
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
