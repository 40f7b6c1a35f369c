//! Codec error types.

use thiserror::Error;

use super::WebImageError;

/// Failures reported by image coders.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CodecError {
    #[error("no coder accepts this data")]
    UnsupportedFormat,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

impl From<image::ImageError> for CodecError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => Self::Decode(e.to_string()),
            image::ImageError::Encoding(e) => Self::Encode(e.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<CodecError> for WebImageError {
    fn from(err: CodecError) -> Self {
        Self::bad_data(err.to_string())
    }
}
