//! In-memory LRU image cache implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::CacheConfig;
use crate::domain::entities::{WeakImage, WebImage};
use crate::domain::ports::MemoryCachePort;

/// Dead weak references are swept once the index grows past this.
const WEAK_INDEX_SWEEP_THRESHOLD: usize = 256;

struct Entry {
    image: WebImage,
    cost: u64,
}

struct MemoryState {
    entries: LruCache<String, Entry>,
    total_cost: u64,
}

/// In-memory LRU cache for decoded images, bounded by total cost and entry
/// count. Thread-safe and optimized for frequent reads.
///
/// With the weak index enabled, images evicted from the LRU stay reachable
/// for as long as some other owner keeps them alive.
pub struct MemoryImageCache {
    state: Mutex<MemoryState>,
    weak_index: Option<Mutex<HashMap<String, WeakImage>>>,
    max_cost: u64,
    max_count: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache with the given limits, 0 meaning unbounded.
    #[must_use]
    pub fn new(max_cost: u64, max_count: usize, use_weak_index: bool) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            weak_index: use_weak_index.then(|| Mutex::new(HashMap::new())),
            max_cost,
            max_count,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache from the memory fields of `config`.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.max_memory_cost,
            config.max_memory_count,
            config.should_use_weak_memory_cache,
        )
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.entries.len(),
            cost: state.total_cost,
        }
    }

    /// Checks for `key` in the LRU without promoting it.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    fn over_limits(&self, state: &MemoryState) -> bool {
        (self.max_count > 0 && state.entries.len() > self.max_count)
            || (self.max_cost > 0 && state.total_cost > self.max_cost)
    }

    fn lookup_weak(&self, key: &str) -> Option<WebImage> {
        let index = self.weak_index.as_ref()?;
        let mut index = index.lock();
        let image = index.get(key)?.upgrade();
        if image.is_none() {
            index.remove(key);
        }
        image
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Current total cost in bytes.
    pub cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {} images, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.cost, self.hit_rate, self.hits, self.misses
        )
    }
}

impl MemoryCachePort for MemoryImageCache {
    fn get(&self, key: &str) -> Option<WebImage> {
        let found = self.state.lock().entries.get(key).map(|e| e.image.clone());
        if let Some(image) = found {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            return Some(image);
        }
        if let Some(image) = self.lookup_weak(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Weak memory cache hit");
            return Some(image);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Memory cache miss");
        None
    }

    fn set_with_cost(&self, key: &str, image: WebImage, cost: u64) {
        if key.is_empty() {
            return;
        }
        if let Some(index) = &self.weak_index {
            let mut index = index.lock();
            index.insert(key.to_string(), image.downgrade());
            if index.len() > WEAK_INDEX_SWEEP_THRESHOLD {
                index.retain(|_, weak| !weak.is_dead());
            }
        }

        let mut state = self.state.lock();
        if let Some(old) = state.entries.put(key.to_string(), Entry { image, cost }) {
            state.total_cost -= old.cost;
        }
        state.total_cost += cost;

        let mut evicted = 0usize;
        while self.over_limits(&state) {
            let Some((_, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.total_cost -= entry.cost;
            evicted += 1;
        }
        if evicted > 0 {
            debug!(
                evicted,
                size = state.entries.len(),
                cost = state.total_cost,
                "Evicted images from memory cache"
            );
        }
    }

    fn remove(&self, key: &str) {
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.pop(key) {
                state.total_cost -= entry.cost;
                debug!(key = %key, "Removed image from memory cache");
            }
        }
        if let Some(index) = &self.weak_index {
            index.lock().remove(key);
        }
    }

    fn purge(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_cost = 0;
        debug!("Purged memory image cache");
    }

    fn clear(&self) {
        self.purge();
        if let Some(index) = &self.weak_index {
            index.lock().clear();
        }
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn total_cost(&self) -> u64 {
        self.state.lock().total_cost
    }
}
