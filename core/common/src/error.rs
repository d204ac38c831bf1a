//! Common error types for vdisk.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for disk operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Access to the resource was refused.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Stored content is not valid UTF-8.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Transport-level failure talking to a remote service.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote service answered with an error payload.
    #[error("Remote error {code}: {message}")]
    Remote { code: u16, message: String },

    /// Disk configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No driver is registered under the requested identifier.
    #[error("Unsupported driver '{driver}' for disk '{disk}'")]
    UnsupportedDriver { disk: String, driver: String },

    /// Some keys of a batched delete were not removed.
    #[error("Batch delete failed for {} of {total} keys", failed.len())]
    BatchDelete {
        total: usize,
        failed: Vec<BatchFailure>,
    },

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error is a configuration problem rather than a
    /// per-operation failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::UnsupportedDriver { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Outcome of one key in a batched delete that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub key: String,
    pub code: u16,
    pub message: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.key, self.code, self.message)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
