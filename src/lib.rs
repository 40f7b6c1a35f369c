//! Pixfetch - asynchronous image fetching with a two-tier cache.
//!
//! This crate loads images by URL through a memory cache, a disk cache and
//! a concurrent HTTP downloader, decoding them with a pluggable coder
//! registry. `ImageManager` ties the pieces together.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the load orchestration and its DTOs.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing codecs, caches and the downloader.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "pixfetch";
