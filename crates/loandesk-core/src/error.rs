//! Error types for loandesk.

use thiserror::Error;

/// Result type alias using loandesk's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for loandesk operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed submission (empty or oversized batch, unknown job type, bad options)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job id unknown to the registry (never submitted, or already evicted)
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Operation not permitted in the job's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A single document's analysis call failed
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
