//! Storage-level errors and their mapping onto [`StoreError`].

use questsync_core::errors::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Database connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write actor is not running")]
    WriterClosed,

    #[error("Stored value out of range: {0}")]
    OutOfRange(String),

    /// Domain error raised inside a write transaction; passed through as-is.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Store(inner) => inner,
            other => StoreError::storage(other.to_string()),
        }
    }
}
