//! Error types and result types for transport operations.
//!
//! Connection failures are shared by every operation waiting on the same
//! connection attempt, so [`TransportError`] is cheap to clone and compares by value.
//! Use [`TransportResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while persisting log records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport was constructed without a usable configuration,
    /// e.g. a missing connection target.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Establishing or authenticating the connection failed.
    ///
    /// Reported to every operation that was waiting on the failed attempt.
    #[error("Connection error: {0}")]
    Connection(String),
    /// A persistence call (insert, index management) failed.
    ///
    /// Reported to the caller of that operation only.
    #[error("Write error: {0}")]
    Write(String),
    /// The transport was closed before the operation could run.
    #[error("Transport closed")]
    Closed,
    /// Converting a value to or from BSON/JSON failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

impl From<BsonError> for TransportError {
    fn from(err: BsonError) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for TransportError {
    fn from(err: SerdeJsonError) -> Self {
        TransportError::Serialization(err.to_string())
    }
}
