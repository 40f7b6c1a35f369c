//! Image coders.
//!
//! This module provides:
//! - A still-image coder with progressive decoding
//! - An animated GIF coder with lazily decoded frames
//! - The ordered coder registry
//! - Option-aware decoding used by the cache and downloader

pub mod animated;
pub mod coders_manager;
pub mod decode;
pub mod gif_coder;
pub mod standard_coder;

pub use animated::{AnimatedGif, GifLayout};
pub use coders_manager::CodersManager;
pub use decode::{DEFAULT_THUMBNAIL_BYTES_LIMIT, coder_options, decode_image_data};
pub use gif_coder::GifCoder;
pub use standard_coder::StandardCoder;
