//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheType, ImageFormat, LoadContext, WebImage, WebImageOptions};
pub use errors::WebImageError;
