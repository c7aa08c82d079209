//! Error types for token persistence

/// Errors from a `TokenPersistence` backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("token file parse error: {0}")]
    Parse(String),
}

/// Result alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
