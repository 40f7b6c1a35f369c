//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default disk age limit: one week.
pub const DEFAULT_MAX_DISK_AGE_SECS: i64 = 60 * 60 * 24 * 7;

/// Timestamp used as the age reference of disk entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExpireType {
    /// Last access time.
    Access,
    /// Last modification time.
    #[default]
    Modification,
}

/// Memory and disk cache limits and behavior.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keep decoded images in the memory tier.
    #[serde(default = "default_true")]
    pub should_cache_images_in_memory: bool,

    /// Keep a non-owning index of images evicted from memory.
    #[serde(default = "default_true")]
    pub should_use_weak_memory_cache: bool,

    /// Run the expiration sweep when the host enters the background.
    #[serde(default = "default_true")]
    pub remove_expired_on_background: bool,

    /// Drop the memory tier when the host enters the background.
    #[serde(default)]
    pub purge_memory_on_background: bool,

    /// Maximum disk entry age in seconds. Negative never expires, zero
    /// expires everything.
    #[serde(default = "default_max_disk_age")]
    pub max_disk_age: i64,

    /// Maximum total disk size in bytes, 0 for unbounded.
    #[serde(default)]
    pub max_disk_size: u64,

    /// Maximum total memory cost in bytes, 0 for unbounded.
    #[serde(default)]
    pub max_memory_cost: u64,

    /// Maximum number of memory entries, 0 for unbounded.
    #[serde(default)]
    pub max_memory_count: usize,

    /// Age reference for disk expiration.
    #[serde(default)]
    pub disk_expire_type: ExpireType,
}

impl CacheConfig {
    /// Age limit as a duration, `None` when entries never expire.
    #[must_use]
    pub fn max_disk_age(&self) -> Option<Duration> {
        u64::try_from(self.max_disk_age)
            .ok()
            .map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            should_cache_images_in_memory: true,
            should_use_weak_memory_cache: true,
            remove_expired_on_background: true,
            purge_memory_on_background: false,
            max_disk_age: DEFAULT_MAX_DISK_AGE_SECS,
            max_disk_size: 0,
            max_memory_cost: 0,
            max_memory_count: 0,
            disk_expire_type: ExpireType::default(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_max_disk_age() -> i64 {
    DEFAULT_MAX_DISK_AGE_SECS
}
