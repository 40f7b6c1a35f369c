//! Errors surfaced to callers of the load pipeline.

use thiserror::Error;

/// Error domain name reported alongside the numeric codes.
pub const ERROR_DOMAIN: &str = "pixfetch.webimage";

/// Classification of a failure reported by the HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The request could not be built or sent.
    Request,
    /// The body stream failed part way.
    Body,
    /// Anything else.
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Pipeline error variants with stable numeric codes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum WebImageError {
    #[error("invalid URL: {reason}")]
    InvalidUrl { reason: String },

    #[error("bad image data: {reason}")]
    BadImageData { reason: String },

    #[error("remote resource not modified")]
    CacheNotModified,

    #[error("invalid download operation: {reason}")]
    InvalidDownloadOperation { reason: String },

    #[error("unexpected HTTP status {status}")]
    InvalidDownloadStatusCode { status: u16 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl WebImageError {
    /// Creates invalid URL error.
    #[must_use]
    pub fn invalid_url(reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            reason: reason.into(),
        }
    }

    /// Creates bad image data error.
    #[must_use]
    pub fn bad_data(reason: impl Into<String>) -> Self {
        Self::BadImageData {
            reason: reason.into(),
        }
    }

    /// Creates invalid download operation error.
    #[must_use]
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidDownloadOperation {
            reason: reason.into(),
        }
    }

    /// Creates transport error.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Stable numeric code. Transport errors carry none of their own.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::InvalidUrl { .. } => Some(1000),
            Self::BadImageData { .. } => Some(1001),
            Self::CacheNotModified => Some(1002),
            Self::InvalidDownloadOperation { .. } => Some(2000),
            Self::InvalidDownloadStatusCode { .. } => Some(2001),
            Self::Cancelled => Some(2002),
            Self::Transport { .. } => None,
        }
    }

    /// HTTP status attached to status code errors.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::InvalidDownloadStatusCode { status } => Some(*status),
            _ => None,
        }
    }

    /// Returns whether error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether error came from the transport.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
