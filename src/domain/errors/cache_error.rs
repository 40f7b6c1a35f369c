//! Cache error types.

use thiserror::Error;

use super::CodecError;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// I/O error during a disk operation.
    #[error("IO error: {0}")]
    Io(String),
    /// The serial I/O queue has shut down.
    #[error("cache I/O queue closed")]
    QueueClosed,
    /// Encoding an image for disk storage failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
