//! Disk-based image cache for persistence across sessions.
//!
//! Every method blocks on filesystem I/O. The cache facade runs them on its
//! serial I/O queue.

use std::fs::{self, File, FileTimes};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};

use super::{CacheConfig, ExpireType};
use crate::domain::entities::ImageFormat;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{DiskCachePort, ExpirationReport};

/// Hook returning an extra read-only location to search for a key.
pub type AdditionalCachePath = Arc<dyn Fn(&str) -> Option<PathBuf> + Send + Sync>;

/// Disk-based image cache that persists encoded image bytes.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_age: Option<Duration>,
    max_size: u64,
    expire_type: ExpireType,
    additional_path: RwLock<Option<AdditionalCachePath>>,
}

struct CachedFile {
    path: PathBuf,
    modified: SystemTime,
    accessed: SystemTime,
    size: u64,
}

impl DiskImageCache {
    /// Creates a disk cache rooted at `cache_dir`. The directory is created
    /// lazily on first write.
    #[must_use]
    pub fn new(cache_dir: PathBuf, config: &CacheConfig) -> Self {
        Self {
            cache_dir,
            max_age: config.max_disk_age(),
            max_size: config.max_disk_size,
            expire_type: config.disk_expire_type,
            additional_path: RwLock::new(None),
        }
    }

    /// Default root for `namespace` under the platform cache directory.
    #[must_use]
    pub fn default_directory(namespace: &str) -> PathBuf {
        dirs_cache_path().join(namespace)
    }

    /// Root directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Sets the hook consulted when a key is missing from the root.
    pub fn set_additional_cache_path(&self, hook: Option<AdditionalCachePath>) {
        *self.additional_path.write() = hook;
    }

    /// Deterministic file name for `key`: SHA-256 hex, plus the key's path
    /// extension when it names a known image format.
    #[must_use]
    pub fn file_name_for_key(key: &str) -> String {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        match key_extension(key) {
            Some(ext) => format!("{digest}.{ext}"),
            None => digest,
        }
    }

    fn scan(&self) -> CacheResult<Vec<CachedFile>> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Io(format!("Failed to read cache dir: {e}"))),
        };
        let mut files = Vec::new();
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(CachedFile {
                path: entry.path(),
                modified,
                accessed: meta.accessed().unwrap_or(modified),
                size: meta.len(),
            });
        }
        Ok(files)
    }

    /// Moves every cached file from `from` into `to`, removing `from`
    /// afterwards.
    ///
    /// Absent source is a no-op; absent destination is a rename; an
    /// existing destination directory is merged into without overwriting;
    /// a destination file is replaced.
    ///
    /// # Errors
    /// Returns `CacheError::Io` if a move fails.
    pub fn move_cache_directory(from: &Path, to: &Path) -> CacheResult<()> {
        if !from.exists() || from == to {
            return Ok(());
        }
        if to.is_file() {
            fs::remove_file(to)?;
        }
        if !to.exists() {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::rename(from, to).is_ok() {
                info!(from = %from.display(), to = %to.display(), "Moved disk cache");
                return Ok(());
            }
            fs::create_dir_all(to)?;
        }

        let mut moved = 0usize;
        for entry in fs::read_dir(from)?.flatten() {
            let target = to.join(entry.file_name());
            if target.exists() {
                continue;
            }
            let source = entry.path();
            if fs::rename(&source, &target).is_err() {
                fs::copy(&source, &target)?;
            }
            moved += 1;
        }
        fs::remove_dir_all(from)?;
        info!(from = %from.display(), to = %to.display(), moved, "Merged disk cache");
        Ok(())
    }
}

/// Lowercased path extension of `key` if it names a known format.
fn key_extension(key: &str) -> Option<String> {
    let path = key.split(['?', '#']).next().unwrap_or(key);
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ImageFormat::from_extension(&ext)
        .is_defined()
        .then_some(ext)
}

fn touch_access_time(path: &Path) {
    if let Ok(file) = File::open(path) {
        let _ = file.set_times(FileTimes::new().set_accessed(SystemTime::now()));
    }
}

impl DiskCachePort for DiskImageCache {
    fn contains(&self, key: &str) -> bool {
        self.cache_path(key).is_some_and(|p| p.is_file())
    }

    fn data(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.cache_path(key)?;
        if let Ok(bytes) = fs::read(&path) {
            trace!(key = %key, path = %path.display(), "Disk cache hit");
            touch_access_time(&path);
            return Some(bytes);
        }
        let hook = self.additional_path.read().clone();
        if let Some(extra) = hook.and_then(|hook| hook(key)) {
            if let Ok(bytes) = fs::read(&extra) {
                trace!(key = %key, path = %extra.display(), "Additional cache path hit");
                return Some(bytes);
            }
        }
        trace!(key = %key, "Disk cache miss");
        None
    }

    fn set_data(&self, key: &str, data: &[u8]) -> CacheResult<()> {
        let Some(path) = self.cache_path(key) else {
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {e}")))?;
        let mut temp_file = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        temp_file.write_all(data)?;
        temp_file.persist(&path).map_err(|e| CacheError::from(e.error))?;
        debug!(key = %key, path = %path.display(), size = data.len(), "Stored image in disk cache");
        Ok(())
    }

    fn remove(&self, key: &str) {
        let Some(path) = self.cache_path(key) else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => debug!(key = %key, "Removed from disk cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to remove from disk cache"),
        }
    }

    fn remove_all(&self) -> CacheResult<()> {
        match fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::Io(format!("Failed to clear cache dir: {e}"))),
        }
        fs::create_dir_all(&self.cache_dir)?;
        debug!("Cleared disk cache");
        Ok(())
    }

    fn remove_expired(&self) -> CacheResult<ExpirationReport> {
        let mut files = self.scan()?;
        let mut report = ExpirationReport::default();

        if let Some(max_age) = self.max_age {
            let cutoff = SystemTime::now().checked_sub(max_age);
            let expire_type = self.expire_type;
            let (expired, kept): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| {
                let reference = match expire_type {
                    ExpireType::Access => f.accessed,
                    ExpireType::Modification => f.modified,
                };
                max_age.is_zero() || cutoff.is_some_and(|cutoff| reference <= cutoff)
            });
            for file in expired {
                if fs::remove_file(&file.path).is_ok() {
                    report.expired += 1;
                    report.freed_bytes += file.size;
                }
            }
            files = kept;
        }

        let mut total: u64 = files.iter().map(|f| f.size).sum();
        if self.max_size > 0 && total > self.max_size {
            files.sort_by_key(|f| f.accessed);
            for file in files {
                if total <= self.max_size {
                    break;
                }
                if let Err(e) = fs::remove_file(&file.path) {
                    warn!(path = %file.path.display(), error = %e, "Failed to remove old cache file");
                    continue;
                }
                total -= file.size;
                report.evicted += 1;
                report.freed_bytes += file.size;
            }
        }

        if report.expired + report.evicted > 0 {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                freed = report.freed_bytes,
                "Disk cache cleanup complete"
            );
        }
        Ok(report)
    }

    fn cache_path(&self, key: &str) -> Option<PathBuf> {
        (!key.is_empty()).then(|| self.cache_dir.join(Self::file_name_for_key(key)))
    }

    fn total_count(&self) -> usize {
        self.scan().map_or(0, |files| files.len())
    }

    fn total_size(&self) -> u64 {
        self.scan()
            .map_or(0, |files| files.iter().map(|f| f.size).sum())
    }
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_age", &self.max_age)
            .field("max_size", &self.max_size)
            .field("expire_type", &self.expire_type)
            .finish_non_exhaustive()
    }
}

/// Returns the default cache directory path.
fn dirs_cache_path() -> PathBuf {
    directories::ProjectDirs::from("com", "pixfetch", "pixfetch").map_or_else(
        || std::env::temp_dir().join("pixfetch").join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}
