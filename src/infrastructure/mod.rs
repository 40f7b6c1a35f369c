//! Infrastructure layer with codecs, caches, the downloader and configuration.

/// Image coders and the coder registry.
pub mod codec;
/// Memory and disk cache tiers and the cache facade.
pub mod cache;
/// Application configuration.
pub mod config;
/// HTTP download queue.
pub mod download;

pub use cache::{CacheConfig, DiskImageCache, ExpireType, ImageCache, MemoryImageCache};
pub use codec::{CodersManager, GifCoder, StandardCoder};
pub use config::{AppConfig, CliArgs, ConfigError, ConfigStore, LogLevel};
pub use download::{DownloaderConfig, ExecutionOrder, ImageDownloader, ReqwestTransport};
