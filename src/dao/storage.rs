use std::error::Error as StdError;

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by store backends regardless of the underlying engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached; the operation in flight is lost.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable context.
        message: String,
        /// Underlying backend failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A conditional write lost its race: the stored version or status no
    /// longer matches what the caller observed.
    #[error("conditional write lost: {0}")]
    Conflict(String),
    /// A create hit a key that already exists.
    #[error("key already exists: {0}")]
    AlreadyExists(String),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl StdError + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
