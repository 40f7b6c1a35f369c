//! Domain entity definitions.

mod cache_key;
mod cache_type;
mod context;
mod download_request;
mod image;
mod image_format;
mod options;
mod system_event;

pub use cache_key::{default_cache_key, scale_factor_for_key, transformed_key};
pub use cache_type::CacheType;
pub use context::LoadContext;
pub use download_request::DownloadRequest;
pub use image::{CacheHit, WeakImage, WebImage};
pub use image_format::{ImageFormat, register_custom_format, unregister_custom_format};
pub use options::WebImageOptions;
pub use system_event::SystemEvent;
