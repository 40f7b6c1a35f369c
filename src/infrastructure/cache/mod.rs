//! Image caching infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction and a weak secondary index
//! - Disk caching with atomic writes and age/size expiration
//! - A serial I/O queue per cache instance
//! - The two-tier cache facade

pub mod config;
pub mod disk_cache;
pub mod image_cache;
pub mod io_queue;
pub mod memory_cache;

pub use config::{CacheConfig, ExpireType};
pub use disk_cache::{AdditionalCachePath, DiskImageCache};
pub use image_cache::{DEFAULT_NAMESPACE, ImageCache};
pub use io_queue::IoQueue;
pub use memory_cache::{CacheStats, MemoryImageCache};
