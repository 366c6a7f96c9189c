//! Error types shared by the CORQ processes
//!
//! Defines a single error enum using thiserror for clear error propagation.
//! The taxonomy separates input errors (detected before a job is enqueued,
//! never retried) from backend errors (delivered inside normal replies) and
//! protocol errors (the reply never arrived or could not be read back).

use thiserror::Error;

/// Main error type for CORQ
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request arguments, detected before enqueue
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The computation backend failed for a given partition
    #[error("Backend error: {0}")]
    Backend(String),

    /// No reply arrived within the configured deadline
    #[error("Worker reply timeouted ({0} s)")]
    Timeout(u64),

    /// Broker communication failures
    #[error("Bus error: {0}")]
    Bus(String),

    /// The stored reply expired or could not be read back
    #[error("Missing result: {0}")]
    MissingResult(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Memoization database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Bus(e.to_string())
    }
}

/// Convenience Result type using the CORQ Error
pub type Result<T> = std::result::Result<T, Error>;
