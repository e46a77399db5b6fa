//! Common error types for scout

use thiserror::Error;

/// Common result type for scout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across scout services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, e.g. session history columns
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lost a compare-and-set race on a session row
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External reasoning collaborator failed (network/API error).
    /// Retryable at the transport level; the flush that hit it is abandoned.
    #[error("Reasoning unavailable: {0}")]
    ReasoningUnavailable(String),

    /// External collaborator (transcription, outbound delivery) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
