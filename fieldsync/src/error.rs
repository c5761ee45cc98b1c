//! Error types for fieldsync
//!
//! All errors use thiserror for structured error handling.
//! Local persistence errors reach RecordService callers; sync errors stay
//! inside background cycles and are recorded on the queue slot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Secure keystore error: {0}")]
    KeyStore(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption gateway used before initialize()")]
    NotInitialized,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote request timed out after {0}s")]
    Timeout(u64),

    #[error("Mutation {0} dropped after exhausting retries")]
    QueueExhausted(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Generic(String),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Network(err.to_string())
    }
}

impl AppError {
    /// Whether a failed replay should count against the slot's retry budget
    /// rather than being treated as a local bug.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
