//! Domain error types.

mod cache_error;
mod codec_error;
mod web_image_error;

pub use cache_error::{CacheError, CacheResult};
pub use codec_error::CodecError;
pub use web_image_error::{ERROR_DOMAIN, TransportErrorKind, WebImageError};
