use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the storage layer.
///
/// Every variant carries an owned message so errors stay `Clone` and can
/// cross task boundaries inside the deletion pipeline.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The owner already shortened this URL. Carries the short code that
    /// was handed out the first time, so callers can answer idempotently.
    #[error("url already shortened as '{existing_code}'")]
    Conflict { existing_code: String },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
