//! Two-tier cache facade: synchronous memory tier in front of a disk tier
//! whose work is serialized on one I/O queue.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{CacheConfig, DiskImageCache, IoQueue, MemoryImageCache};
use crate::domain::entities::{
    CacheHit, CacheType, ImageFormat, LoadContext, SystemEvent, WebImage, WebImageOptions,
};
use crate::domain::errors::{CacheError, CacheResult, WebImageError};
use crate::domain::ports::{
    CoderOptions, DiskCachePort, ExpirationReport, ImageCachePort, ImageCoder, MemoryCachePort,
};
use crate::infrastructure::codec::{CodersManager, decode_image_data};

/// Namespace of the process-wide cache.
pub const DEFAULT_NAMESPACE: &str = "default";

static SHARED: OnceLock<Arc<ImageCache>> = OnceLock::new();

/// Memory + disk image cache behind one key-addressed API.
pub struct ImageCache {
    config: CacheConfig,
    memory: Arc<dyn MemoryCachePort>,
    disk: Arc<dyn DiskCachePort>,
    coders: Arc<CodersManager>,
    io: IoQueue,
}

/// Inputs of one disk-phase lookup, moved onto the I/O queue.
struct DiskQuery {
    disk: Arc<dyn DiskCachePort>,
    memory: Arc<dyn MemoryCachePort>,
    coders: Arc<CodersManager>,
    key: String,
    options: WebImageOptions,
    context: LoadContext,
    memory_image: Option<WebImage>,
    promote: bool,
}

impl DiskQuery {
    fn run(self) -> Result<Option<CacheHit>, WebImageError> {
        let Some(data) = self.disk.data(&self.key) else {
            return Ok(self.memory_image.map(memory_hit));
        };
        let data = Bytes::from(data);
        if let Some(image) = self.memory_image {
            return Ok(Some(CacheHit {
                image: Some(image),
                data: Some(data),
                cache_type: CacheType::Memory,
            }));
        }
        let image = decode_image_data(
            &data,
            Some(&self.key),
            self.options,
            &self.context,
            &self.coders,
        )?;
        if self.promote {
            self.memory.set(&self.key, image.clone());
        }
        trace!(key = %self.key, "Disk cache hit decoded");
        Ok(Some(CacheHit {
            image: Some(image),
            data: Some(data),
            cache_type: CacheType::Disk,
        }))
    }
}

fn memory_hit(image: WebImage) -> CacheHit {
    CacheHit {
        image: Some(image),
        data: None,
        cache_type: CacheType::Memory,
    }
}

/// Encodes `image` for disk when no bytes were supplied.
fn disk_bytes(
    coders: &CodersManager,
    image: Option<&WebImage>,
    data: Option<Bytes>,
) -> CacheResult<Option<Bytes>> {
    if let Some(data) = data {
        return Ok(Some(data));
    }
    let Some(image) = image else {
        return Ok(None);
    };
    let format = if coders.can_encode(image.format()) {
        image.format()
    } else {
        ImageFormat::Undefined
    };
    Ok(Some(coders.encode(image, format, &CoderOptions::default())?))
}

impl ImageCache {
    /// Creates a cache whose disk tier lives in `directory/namespace`, or
    /// in the platform cache directory when `directory` is `None`.
    ///
    /// # Errors
    /// Returns `CacheError` if the I/O queue cannot be started.
    pub fn new(namespace: &str, directory: Option<&Path>, config: CacheConfig) -> CacheResult<Self> {
        let root = directory.map_or_else(
            || DiskImageCache::default_directory(namespace),
            |dir| dir.join(namespace),
        );
        let memory = Arc::new(MemoryImageCache::from_config(&config));
        let disk = Arc::new(DiskImageCache::new(root, &config));
        Self::with_parts(config, memory, disk, CodersManager::shared())
    }

    /// Creates a cache from explicit tiers and coders.
    ///
    /// # Errors
    /// Returns `CacheError` if the I/O queue cannot be started.
    pub fn with_parts(
        config: CacheConfig,
        memory: Arc<dyn MemoryCachePort>,
        disk: Arc<dyn DiskCachePort>,
        coders: Arc<CodersManager>,
    ) -> CacheResult<Self> {
        Ok(Self {
            config,
            memory,
            disk,
            coders,
            io: IoQueue::new("pixfetch-cache-io")?,
        })
    }

    /// Process-wide cache in the default namespace.
    ///
    /// # Errors
    /// Returns `CacheError` if it had to be created and creation failed.
    pub fn shared() -> CacheResult<Arc<Self>> {
        if let Some(cache) = SHARED.get() {
            return Ok(cache.clone());
        }
        let cache = Arc::new(Self::new(DEFAULT_NAMESPACE, None, CacheConfig::default())?);
        Ok(SHARED.get_or_init(|| cache).clone())
    }

    /// Installs the process-wide cache. Fails if it already exists.
    ///
    /// # Errors
    /// Returns the rejected cache if `shared()` was already initialized.
    pub fn install_shared(cache: Arc<Self>) -> Result<(), Arc<Self>> {
        SHARED.set(cache)
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Memory tier.
    #[must_use]
    pub fn memory(&self) -> &Arc<dyn MemoryCachePort> {
        &self.memory
    }

    /// Disk tier.
    #[must_use]
    pub fn disk(&self) -> &Arc<dyn DiskCachePort> {
        &self.disk
    }

    /// Disk file path used for `key`.
    #[must_use]
    pub fn cache_path(&self, key: &str) -> Option<PathBuf> {
        self.disk.cache_path(key)
    }

    fn memory_enabled(&self, scope: CacheType) -> bool {
        scope.includes_memory() && self.config.should_cache_images_in_memory
    }

    /// Stores an image and/or its bytes.
    ///
    /// The memory write happens before this returns; the disk write runs on
    /// the I/O queue and the returned future resolves once it finished.
    /// Without `data` the image is encoded with the registered coders.
    pub fn store(
        &self,
        image: Option<WebImage>,
        data: Option<Bytes>,
        key: &str,
        scope: CacheType,
    ) -> impl Future<Output = CacheResult<()>> + Send + 'static {
        let skip = key.is_empty() || (image.is_none() && data.is_none());
        if !skip && self.memory_enabled(scope) {
            if let Some(image) = &image {
                self.memory.set(key, image.clone());
            }
        }
        let disk_job = (!skip && scope.includes_disk()).then(|| {
            let disk = self.disk.clone();
            let coders = self.coders.clone();
            let key = key.to_string();
            move || -> CacheResult<()> {
                match disk_bytes(&coders, image.as_ref(), data)? {
                    Some(bytes) => disk.set_data(&key, &bytes),
                    None => Ok(()),
                }
            }
        });
        let submitted = disk_job.map(|job| {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let sent = self.io.spawn(move || {
                let _ = tx.send(job());
            });
            (sent, rx)
        });
        async move {
            let Some((sent, rx)) = submitted else {
                return Ok(());
            };
            sent?;
            rx.await.map_err(|_| CacheError::QueueClosed)?
        }
    }

    /// Like [`store`](Self::store) but blocks until the disk write is done.
    ///
    /// # Errors
    /// Returns `CacheError` if encoding or the disk write fails.
    pub fn store_blocking(
        &self,
        image: Option<WebImage>,
        data: Option<Bytes>,
        key: &str,
        scope: CacheType,
    ) -> CacheResult<()> {
        if key.is_empty() || (image.is_none() && data.is_none()) {
            return Ok(());
        }
        if self.memory_enabled(scope) {
            if let Some(image) = &image {
                self.memory.set(key, image.clone());
            }
        }
        if !scope.includes_disk() {
            return Ok(());
        }
        let disk = self.disk.clone();
        let coders = self.coders.clone();
        let key = key.to_string();
        self.io.run_blocking(move || match disk_bytes(&coders, image.as_ref(), data)? {
            Some(bytes) => disk.set_data(&key, &bytes),
            None => Ok(()),
        })?
    }

    /// Looks up `key`: memory synchronously first, then disk on the I/O
    /// queue. A disk hit is decoded and promoted into memory.
    ///
    /// `QUERY_MEMORY_DATA` also reads the bytes from disk on a memory hit.
    /// `QUERY_MEMORY_DATA_SYNC` / `QUERY_DISK_DATA_SYNC` block the caller
    /// on the disk phase instead of suspending.
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fired, `BadImageData` if the disk bytes do not
    /// decode. Disk I/O failures are reported as a miss.
    pub async fn query(
        &self,
        key: &str,
        options: WebImageOptions,
        context: &LoadContext,
        scope: CacheType,
        cancel: &CancellationToken,
    ) -> Result<Option<CacheHit>, WebImageError> {
        if key.is_empty() || scope == CacheType::None {
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Err(WebImageError::Cancelled);
        }

        let memory_image = if scope.includes_memory() {
            self.memory_lookup(key, options)
        } else {
            None
        };
        let wants_data = options.contains(WebImageOptions::QUERY_MEMORY_DATA);
        if let Some(image) = &memory_image {
            if !wants_data || !scope.includes_disk() {
                return Ok(Some(memory_hit(image.clone())));
            }
        }
        if !scope.includes_disk() {
            return Ok(None);
        }

        let sync = if memory_image.is_some() {
            options.contains(WebImageOptions::QUERY_MEMORY_DATA_SYNC)
        } else {
            options.contains(WebImageOptions::QUERY_DISK_DATA_SYNC)
        };
        let job = DiskQuery {
            disk: self.disk.clone(),
            memory: self.memory.clone(),
            coders: self.coders.clone(),
            key: key.to_string(),
            options,
            context: context.clone(),
            memory_image: memory_image.clone(),
            promote: self.memory_enabled(scope),
        };
        let outcome = if sync {
            self.io.run_blocking(move || job.run())
        } else {
            self.io.run(move || job.run()).await
        };

        if cancel.is_cancelled() {
            debug!(key = %key, "Discarding cache result after cancellation");
            return Err(WebImageError::Cancelled);
        }
        match outcome {
            Ok(result) => {
                if let Err(e) = &result {
                    warn!(key = %key, error = %e, "Cached image data failed to decode");
                }
                result
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk query failed, treating as miss");
                Ok(memory_image.map(memory_hit))
            }
        }
    }

    fn memory_lookup(&self, key: &str, options: WebImageOptions) -> Option<WebImage> {
        let image = self.memory.get(key)?;
        if options.contains(WebImageOptions::DECODE_FIRST_FRAME_ONLY) && image.is_animated() {
            return Some(image.first_frame());
        }
        if options.requires_animated() && !image.is_animated() {
            trace!(key = %key, "Memory hit is not animated, skipping");
            return None;
        }
        Some(image)
    }

    /// Synchronous memory-only lookup.
    #[must_use]
    pub fn image_from_memory(&self, key: &str) -> Option<WebImage> {
        if key.is_empty() {
            return None;
        }
        self.memory.get(key)
    }

    /// Removes `key` from the tiers named by `scope`. Missing keys are fine.
    pub async fn remove(&self, key: &str, scope: CacheType) {
        if key.is_empty() {
            return;
        }
        if scope.includes_memory() {
            self.memory.remove(key);
        }
        if scope.includes_disk() {
            let disk = self.disk.clone();
            let key = key.to_string();
            if let Err(e) = self.io.run(move || disk.remove(&key)).await {
                warn!(error = %e, "Disk removal was not scheduled");
            }
        }
    }

    /// Reports which tier holds `key`, memory first.
    pub async fn contains(&self, key: &str, scope: CacheType) -> CacheType {
        if key.is_empty() {
            return CacheType::None;
        }
        if scope.includes_memory() && self.memory.get(key).is_some() {
            return CacheType::Memory;
        }
        if scope.includes_disk() {
            let disk = self.disk.clone();
            let key = key.to_string();
            if self.io.run(move || disk.contains(&key)).await.unwrap_or(false) {
                return CacheType::Disk;
            }
        }
        CacheType::None
    }

    /// Empties the tiers named by `scope`.
    ///
    /// # Errors
    /// Returns `CacheError` if the disk directory cannot be cleared.
    pub async fn clear(&self, scope: CacheType) -> CacheResult<()> {
        if scope.includes_memory() {
            self.memory.clear();
        }
        if scope.includes_disk() {
            let disk = self.disk.clone();
            self.io.run(move || disk.remove_all()).await??;
        }
        Ok(())
    }

    /// Runs the disk age/size sweep.
    ///
    /// # Errors
    /// Returns `CacheError` if the disk directory cannot be read.
    pub async fn remove_expired_data(&self) -> CacheResult<ExpirationReport> {
        let disk = self.disk.clone();
        self.io.run(move || disk.remove_expired()).await?
    }

    /// Total bytes on disk.
    pub async fn total_disk_size(&self) -> u64 {
        let disk = self.disk.clone();
        self.io.run(move || disk.total_size()).await.unwrap_or(0)
    }

    /// Number of files on disk.
    pub async fn total_disk_count(&self) -> usize {
        let disk = self.disk.clone();
        self.io.run(move || disk.total_count()).await.unwrap_or(0)
    }

    /// Moves a disk cache root, serialized with the other disk work.
    ///
    /// # Errors
    /// Returns `CacheError::Io` if a move fails.
    pub async fn migrate_disk_cache(&self, from: &Path, to: &Path) -> CacheResult<()> {
        let (from, to) = (from.to_path_buf(), to.to_path_buf());
        self.io
            .run(move || DiskImageCache::move_cache_directory(&from, &to))
            .await?
    }

    /// Reacts to a host lifecycle signal.
    pub fn handle_system_event(&self, event: SystemEvent) {
        match event {
            SystemEvent::MemoryWarning => self.memory.purge(),
            SystemEvent::EnterBackground => {
                if self.config.purge_memory_on_background {
                    self.memory.purge();
                }
                if self.config.remove_expired_on_background {
                    let disk = self.disk.clone();
                    let scheduled = self.io.spawn(move || {
                        if let Err(e) = disk.remove_expired() {
                            warn!(error = %e, "Background expiration failed");
                        }
                    });
                    if scheduled.is_err() {
                        warn!("Background expiration was not scheduled");
                    }
                }
            }
        }
        info!(?event, "Handled system event");
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("config", &self.config)
            .field("memory_entries", &self.memory.len())
            .field("coders", &self.coders)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ImageCachePort for ImageCache {
    fn query_memory(&self, key: &str) -> Option<WebImage> {
        self.image_from_memory(key)
    }

    async fn query(
        &self,
        key: &str,
        options: WebImageOptions,
        context: &LoadContext,
        scope: CacheType,
        cancel: &CancellationToken,
    ) -> Result<Option<CacheHit>, WebImageError> {
        Self::query(self, key, options, context, scope, cancel).await
    }

    async fn store(
        &self,
        image: Option<WebImage>,
        data: Option<Bytes>,
        key: &str,
        scope: CacheType,
    ) -> CacheResult<()> {
        Self::store(self, image, data, key, scope).await
    }

    async fn remove(&self, key: &str, scope: CacheType) {
        Self::remove(self, key, scope).await;
    }

    async fn contains(&self, key: &str, scope: CacheType) -> CacheType {
        Self::contains(self, key, scope).await
    }

    async fn clear(&self, scope: CacheType) {
        if let Err(e) = Self::clear(self, scope).await {
            warn!(error = %e, "Failed to clear cache");
        }
    }
}
