//! Port definition for the disk tier.

use std::path::PathBuf;

use crate::domain::errors::CacheError;

/// Summary of an expiration sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationReport {
    /// Files removed because they exceeded the age limit.
    pub expired: usize,
    /// Files removed to get back under the size limit.
    pub evicted: usize,
    /// Bytes released.
    pub freed_bytes: u64,
}

/// Blocking key to file store.
///
/// Every method may block on I/O. Callers run them off latency-sensitive
/// paths and serialize mutations per instance.
pub trait DiskCachePort: Send + Sync {
    /// Returns true if a file exists for `key`.
    fn contains(&self, key: &str) -> bool;

    /// Reads the bytes stored for `key`.
    fn data(&self, key: &str) -> Option<Vec<u8>>;

    /// Atomically stores `data` for `key`. Empty data is ignored.
    ///
    /// # Errors
    /// Returns `CacheError` if the file cannot be written.
    fn set_data(&self, key: &str, data: &[u8]) -> Result<(), CacheError>;

    /// Removes the file for `key`. Missing files are ignored.
    fn remove(&self, key: &str);

    /// Removes every cached file.
    ///
    /// # Errors
    /// Returns `CacheError` if the directory cannot be read.
    fn remove_all(&self) -> Result<(), CacheError>;

    /// Runs the age and size sweep.
    ///
    /// # Errors
    /// Returns `CacheError` if the directory cannot be read.
    fn remove_expired(&self) -> Result<ExpirationReport, CacheError>;

    /// File path used for `key`, or `None` for keys that cannot map to a path.
    fn cache_path(&self, key: &str) -> Option<PathBuf>;

    /// Number of cached files.
    fn total_count(&self) -> usize;

    /// Total bytes of cached files.
    fn total_size(&self) -> u64;
}
