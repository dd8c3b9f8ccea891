//! Error types for the concrete sinks.

use footprint_core::StoreError;
use thiserror::Error;

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside a sink.
#[derive(Debug, Error)]
pub enum Error {
    /// Database error from libSQL.
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client construction error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid data in the database.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Serialization(e) => StoreError::Serialization(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
