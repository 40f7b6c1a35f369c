//! Top-level load orchestration: cache first, then the loader, then
//! write-back.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::combined_operation::{CombinedOperation, OperationRegistry};
use super::failed_urls::FailedUrls;
use super::loaders_manager::ImageLoadersManager;
use crate::application::dto::{ImageLoad, ImageResult, LoadEvent};
use crate::domain::entities::{
    CacheHit, CacheType, LoadContext, WebImage, WebImageOptions, default_cache_key,
    scale_factor_for_key, transformed_key,
};
use crate::domain::errors::{CacheError, WebImageError};
use crate::domain::ports::{
    CacheKeyFilter, CacheSerializer, Cancellable, CompletedOperation, ImageCachePort,
    ImageLoaderPort, ImageTransformer, LoaderEvent, LoaderOutput, ManagerDelegate,
    OptionsProcessor,
};
use crate::infrastructure::cache::ImageCache;
use crate::infrastructure::download::ImageDownloader;

static SHARED: OnceLock<Arc<ImageManager>> = OnceLock::new();

/// Failure to build the default manager.
#[derive(Debug, Error)]
pub enum ManagerSetupError {
    #[allow(missing_docs)]
    #[error("Cache setup failed: {0}")]
    Cache(#[from] CacheError),

    #[allow(missing_docs)]
    #[error("Downloader setup failed: {0}")]
    Loader(#[from] WebImageError),
}

/// Composes a cache and a loader behind one load call.
pub struct ImageManager {
    cache: Arc<dyn ImageCachePort>,
    loader: Arc<dyn ImageLoaderPort>,
    failed_urls: Arc<FailedUrls>,
    running: Arc<OperationRegistry>,
    cache_key_filter: Option<Arc<dyn CacheKeyFilter>>,
    cache_serializer: Option<Arc<dyn CacheSerializer>>,
    transformer: Option<Arc<dyn ImageTransformer>>,
    options_processor: Option<Arc<dyn OptionsProcessor>>,
    delegate: Option<Arc<dyn ManagerDelegate>>,
}

impl std::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageManager")
            .field("running", &self.running.lock().len())
            .field("failed_urls", &self.failed_urls.len())
            .finish_non_exhaustive()
    }
}

impl ImageManager {
    /// Creates a manager over `cache` and `loader` using the shared
    /// failed-URL set.
    #[must_use]
    pub fn new(cache: Arc<dyn ImageCachePort>, loader: Arc<dyn ImageLoaderPort>) -> Self {
        Self {
            cache,
            loader,
            failed_urls: FailedUrls::shared(),
            running: Arc::new(OperationRegistry::default()),
            cache_key_filter: None,
            cache_serializer: None,
            transformer: None,
            options_processor: None,
            delegate: None,
        }
    }

    /// Process-wide manager over the shared cache and downloader.
    ///
    /// # Errors
    /// Returns error if the shared cache or downloader cannot be created.
    pub fn shared() -> Result<Arc<Self>, ManagerSetupError> {
        if let Some(manager) = SHARED.get() {
            return Ok(manager.clone());
        }
        let cache = ImageCache::shared()?;
        let downloader: Arc<dyn ImageLoaderPort> = ImageDownloader::shared()?;
        let loaders = Arc::new(ImageLoadersManager::new(vec![downloader]));
        let manager = Arc::new(Self::new(cache, loaders));
        Ok(SHARED.get_or_init(|| manager).clone())
    }

    /// Installs the process-wide manager.
    ///
    /// # Errors
    /// Returns the rejected manager if `shared()` was already initialized.
    pub fn install_shared(manager: Arc<Self>) -> Result<(), Arc<Self>> {
        SHARED.set(manager)
    }

    /// Uses `failed_urls` instead of the shared set.
    #[must_use]
    pub fn with_failed_urls(mut self, failed_urls: Arc<FailedUrls>) -> Self {
        self.failed_urls = failed_urls;
        self
    }

    /// Default key filter for loads whose context sets none.
    #[must_use]
    pub fn with_cache_key_filter(mut self, filter: Arc<dyn CacheKeyFilter>) -> Self {
        self.cache_key_filter = Some(filter);
        self
    }

    /// Default serializer for loads whose context sets none.
    #[must_use]
    pub fn with_cache_serializer(mut self, serializer: Arc<dyn CacheSerializer>) -> Self {
        self.cache_serializer = Some(serializer);
        self
    }

    /// Default transformer for loads whose context sets none.
    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn ImageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Adjusts options and context of every load.
    #[must_use]
    pub fn with_options_processor(mut self, processor: Arc<dyn OptionsProcessor>) -> Self {
        self.options_processor = Some(processor);
        self
    }

    /// Sets the delegate.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn ManagerDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// The cache in use.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ImageCachePort> {
        &self.cache
    }

    /// The loader in use.
    #[must_use]
    pub fn loader(&self) -> &Arc<dyn ImageLoaderPort> {
        &self.loader
    }

    /// The failed-URL set in use.
    #[must_use]
    pub fn failed_urls(&self) -> &Arc<FailedUrls> {
        &self.failed_urls
    }

    /// Cache key for `url`: the context filter, else the manager filter,
    /// else the URL string.
    #[must_use]
    pub fn cache_key_for_url(&self, url: &Url, context: Option<&LoadContext>) -> String {
        context
            .and_then(|c| c.cache_key_filter.as_ref())
            .or(self.cache_key_filter.as_ref())
            .and_then(|filter| filter.cache_key(url))
            .unwrap_or_else(|| default_cache_key(url))
    }

    /// Clears the failed mark on `url`.
    pub fn remove_failed_url(&self, url: &Url) {
        self.failed_urls.remove(url);
    }

    /// Clears every failed mark.
    pub fn remove_all_failed_urls(&self) {
        self.failed_urls.clear();
    }

    /// Cancels every running load.
    pub fn cancel_all(&self) {
        let running: Vec<_> = self.running.lock().values().cloned().collect();
        if !running.is_empty() {
            info!(count = running.len(), "Cancelling all loads");
        }
        for operation in running {
            operation.cancel();
        }
    }

    /// True while any load is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.running.lock().is_empty()
    }

    /// Number of running loads.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Loads `url` through the cache and, on a miss, the loader.
    ///
    /// Invalid and failed URLs complete immediately without touching the
    /// cache or the loader.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn load_image(
        &self,
        url: &str,
        options: WebImageOptions,
        context: LoadContext,
    ) -> ImageLoad {
        let (tx, rx) = mpsc::unbounded_channel();

        let url = match Url::parse(url.trim()) {
            Ok(url) => url,
            Err(e) => {
                debug!(url, error = %e, "Rejecting invalid URL");
                let _ = tx.send(LoadEvent::Completed(Err(WebImageError::invalid_url(
                    e.to_string(),
                ))));
                return ImageLoad::new(Arc::new(CompletedOperation), rx);
            }
        };

        let (options, context) = match &self.options_processor {
            Some(processor) => processor.process(&url, options, context),
            None => (options, context),
        };

        if !options.contains(WebImageOptions::RETRY_FAILED) && self.failed_urls.contains(&url) {
            debug!(url = %url, "URL is marked failed");
            let _ = tx.send(LoadEvent::Completed(Err(WebImageError::invalid_url(
                "URL is marked as failed",
            ))));
            return ImageLoad::new(Arc::new(CompletedOperation), rx);
        }

        let original_key = self.cache_key_for_url(&url, Some(&context));
        let transformer = context
            .transformer
            .clone()
            .or_else(|| self.transformer.clone());
        let key = transformer
            .as_ref()
            .map_or_else(|| original_key.clone(), |t| transformed_key(&original_key, &t.key()));
        let serializer = context
            .cache_serializer
            .clone()
            .or_else(|| self.cache_serializer.clone());

        let operation = CombinedOperation::start(url.clone(), tx, &self.running);
        let task = LoadTask {
            operation: operation.clone(),
            cache: self.cache.clone(),
            loader: self.loader.clone(),
            failed_urls: self.failed_urls.clone(),
            delegate: self.delegate.clone(),
            transformer,
            serializer,
            url,
            key,
            original_key,
            options,
            context,
        };
        tokio::spawn(task.run());

        ImageLoad::new(operation, rx)
    }
}

/// Everything one load needs once it left the caller.
struct LoadTask {
    operation: Arc<CombinedOperation>,
    cache: Arc<dyn ImageCachePort>,
    loader: Arc<dyn ImageLoaderPort>,
    failed_urls: Arc<FailedUrls>,
    delegate: Option<Arc<dyn ManagerDelegate>>,
    transformer: Option<Arc<dyn ImageTransformer>>,
    serializer: Option<Arc<dyn CacheSerializer>>,
    url: Url,
    key: String,
    original_key: String,
    options: WebImageOptions,
    context: LoadContext,
}

impl LoadTask {
    async fn run(mut self) {
        let cached = match self.query_cache().await {
            Ok(cached) => cached,
            Err(e) => {
                self.operation.finish(Err(e));
                return;
            }
        };
        if self.operation.is_cancelled() {
            return;
        }

        let should_download = !self.options.contains(WebImageOptions::FROM_CACHE_ONLY)
            && (cached.is_none() || self.options.contains(WebImageOptions::REFRESH_CACHED))
            && self
                .delegate
                .as_ref()
                .is_none_or(|d| d.should_download(&self.url))
            && self.loader.can_request_image(&self.url);

        match (cached, should_download) {
            (Some(hit), true) => {
                trace!(key = %self.key, "Delivering cached image before refresh");
                let result = self.cached_result(&hit, false);
                self.operation.send(LoadEvent::Partial(result));
                self.context.loader_cached_image = hit.image.clone();
                self.download(Some(hit)).await;
            }
            (Some(hit), false) => {
                trace!(key = %self.key, cache_type = ?hit.cache_type, "Cache hit");
                let result = self.cached_result(&hit, true);
                self.operation.finish(Ok(result));
            }
            (None, true) => self.download(None).await,
            (None, false) => {
                trace!(key = %self.key, "Cache miss and download not allowed");
                let result = ImageResult {
                    image: None,
                    data: None,
                    cache_type: CacheType::None,
                    url: self.url.clone(),
                    finished: true,
                };
                self.operation.finish(Ok(result));
            }
        }
    }

    /// `Ok(None)` on a miss or when the cache is bypassed. Decode failures
    /// degrade to a miss unless the load may not reach the network.
    async fn query_cache(&self) -> Result<Option<CacheHit>, WebImageError> {
        if self.options.contains(WebImageOptions::FROM_LOADER_ONLY) {
            return Ok(None);
        }
        let scope = self.context.query_cache_type.unwrap_or(CacheType::All);
        match self
            .cache
            .query(
                &self.key,
                self.options,
                &self.context,
                scope,
                self.operation.cancellation_token(),
            )
            .await
        {
            Ok(hit) => Ok(hit.filter(|h| h.image.is_some())),
            Err(WebImageError::Cancelled) => Ok(None),
            Err(e) if self.options.contains(WebImageOptions::FROM_CACHE_ONLY) => Err(e),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Cached data unusable, refetching");
                Ok(None)
            }
        }
    }

    fn cached_result(&self, hit: &CacheHit, finished: bool) -> ImageResult {
        ImageResult {
            image: hit.image.clone(),
            data: hit.data.clone(),
            cache_type: hit.cache_type,
            url: self.url.clone(),
            finished,
        }
    }

    async fn download(self, cached: Option<CacheHit>) {
        let (sink, mut events) = mpsc::unbounded_channel();
        let mut context = self.context.clone();
        if context.image_scale_factor.is_none() {
            context.image_scale_factor = Some(scale_factor_for_key(&self.key));
        }

        let started = self.operation.start_loader(|| {
            self.loader
                .request_image(&self.url, self.options, &context, sink)
        });
        if !started {
            return;
        }

        let cancelled = self.operation.cancellation_token().clone();
        loop {
            let event = tokio::select! {
                biased;

                () = cancelled.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            match event {
                LoaderEvent::Progress { received, expected } => {
                    self.operation.send(LoadEvent::Progress {
                        received,
                        expected,
                        url: self.url.clone(),
                    });
                }
                LoaderEvent::Partial { image, .. } => {
                    self.operation.send(LoadEvent::Partial(ImageResult {
                        image: Some(image),
                        data: None,
                        cache_type: CacheType::None,
                        url: self.url.clone(),
                        finished: false,
                    }));
                }
                LoaderEvent::Finished(Ok(output)) => {
                    self.complete(output).await;
                    return;
                }
                LoaderEvent::Finished(Err(error)) => {
                    self.fail(error, cached);
                    return;
                }
            }
        }

        if !self.operation.is_cancelled() {
            self.operation.finish(Err(WebImageError::invalid_operation(
                "loader stopped without a result",
            )));
        }
    }

    fn fail(&self, error: WebImageError, cached: Option<CacheHit>) {
        if error == WebImageError::CacheNotModified {
            if let Some(hit) = cached {
                trace!(key = %self.key, "Cached image is still current");
                let result = self.cached_result(&hit, true);
                self.operation.finish(Ok(result));
                return;
            }
        }
        if error.is_cancelled() {
            return;
        }

        let block = self
            .delegate
            .as_ref()
            .and_then(|d| d.should_block_failed_url(&self.url, &error))
            .unwrap_or_else(|| self.loader.should_block_failed_url(&self.url, &error));
        if block {
            self.failed_urls.insert(&self.url);
        }
        self.operation.finish(Err(error));
    }

    async fn complete(&self, output: LoaderOutput) {
        if self.options.contains(WebImageOptions::RETRY_FAILED) {
            self.failed_urls.remove(&self.url);
        }
        if self.operation.is_cancelled() {
            return;
        }

        let LoaderOutput { image, data } = output;
        let transformed = self.transform(&image).await;
        let store_scope = self.context.store_cache_type.unwrap_or(CacheType::All);

        if let Some(transformed) = &transformed {
            let original_scope = self
                .context
                .original_store_cache_type
                .unwrap_or(CacheType::None);
            if original_scope != CacheType::None {
                let original_data = self.serialize(&image, Some(&data));
                self.store(image.clone(), original_data, &self.original_key, original_scope)
                    .await;
            }
            let transformed_data = self.serialize(transformed, None);
            self.store(transformed.clone(), transformed_data, &self.key, store_scope)
                .await;
        } else {
            let final_data = self.serialize(&image, Some(&data));
            self.store(image.clone(), final_data, &self.key, store_scope)
                .await;
        }

        let result = ImageResult {
            image: Some(transformed.unwrap_or(image)),
            data: Some(data),
            cache_type: CacheType::None,
            url: self.url.clone(),
            finished: true,
        };
        self.operation.finish(Ok(result));
    }

    async fn transform(&self, image: &WebImage) -> Option<WebImage> {
        let transformer = self.transformer.clone()?;
        if image.is_animated() && !self.options.contains(WebImageOptions::TRANSFORM_ANIMATED_IMAGE)
        {
            return None;
        }
        let image = image.clone();
        let key = self.original_key.clone();
        tokio::task::spawn_blocking(move || transformer.transform(&image, &key))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Transformer panicked, keeping original");
                None
            })
    }

    /// Bytes to persist. `None` lets the cache encode the image.
    fn serialize(&self, image: &WebImage, data: Option<&Bytes>) -> Option<Bytes> {
        match &self.serializer {
            Some(serializer) => serializer.cache_data(image, data, Some(&self.url)),
            None => data.cloned(),
        }
    }

    async fn store(
        &self,
        image: WebImage,
        data: Option<Bytes>,
        key: &str,
        scope: CacheType,
    ) {
        if scope == CacheType::None {
            return;
        }
        if let Err(e) = self.cache.store(Some(image), data, key, scope).await {
            warn!(key = %key, error = %e, "Failed to store image");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockImageLoader;
    use crate::domain::ports::LoaderSink;
    use crate::infrastructure::cache::CacheConfig;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const URL: &str = "https://img.example.com/photo.png";

    struct Fixture {
        _dir: TempDir,
        cache: Arc<ImageCache>,
        loader: Arc<MockImageLoader>,
    }

    impl Fixture {
        fn new(loader: MockImageLoader) -> Self {
            let dir = TempDir::new().unwrap();
            let cache =
                Arc::new(ImageCache::new("test", Some(dir.path()), CacheConfig::default()).unwrap());
            Self {
                _dir: dir,
                cache,
                loader: Arc::new(loader),
            }
        }

        fn manager(&self) -> ImageManager {
            ImageManager::new(self.cache.clone(), self.loader.clone())
                .with_failed_urls(Arc::new(FailedUrls::new()))
        }
    }

    async fn events(mut load: ImageLoad) -> Vec<LoadEvent> {
        let mut out = Vec::new();
        while let Some(event) = load.next_event().await {
            out.push(event);
        }
        out
    }

    fn png_bytes() -> Bytes {
        let mut data = Vec::new();
        image::DynamicImage::new_rgba8(3, 3)
            .write_to(&mut std::io::Cursor::new(&mut data), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(data)
    }

    #[tokio::test]
    async fn test_download_then_memory_hit() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager();

        let first = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert_eq!(first.cache_type, CacheType::None);
        assert!(first.finished);
        assert_eq!(first.image.as_ref().unwrap().width(), 4);
        assert!(first.data.is_some());
        assert!(!manager.is_running());

        let second = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert_eq!(second.cache_type, CacheType::Memory);
        assert_eq!(fixture.loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_url_short_circuits_without_network() {
        let fixture = Fixture::new(MockImageLoader::failing(
            WebImageError::bad_data("corrupt"),
            true,
        ));
        let manager = fixture.manager();
        let url = Url::parse(URL).unwrap();

        let err = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, WebImageError::BadImageData { .. }));
        assert!(manager.failed_urls().contains(&url));

        let err = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, WebImageError::InvalidUrl { .. }));
        assert_eq!(fixture.loader.calls(), 1);

        let _ = manager
            .load_image(URL, WebImageOptions::RETRY_FAILED, LoadContext::default())
            .wait()
            .await;
        assert_eq!(fixture.loader.calls(), 2);

        manager.remove_failed_url(&url);
        let _ = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await;
        assert_eq!(fixture.loader.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_success_clears_failed_mark() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager();
        let url = Url::parse(URL).unwrap();
        manager.failed_urls().insert(&url);

        manager
            .load_image(URL, WebImageOptions::RETRY_FAILED, LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert!(manager.failed_urls().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_not_blacklisted() {
        let fixture = Fixture::new(MockImageLoader::failing(
            WebImageError::InvalidDownloadStatusCode { status: 503 },
            false,
        ));
        let manager = fixture.manager();
        for _ in 0..2 {
            let err = manager
                .load_image(URL, WebImageOptions::empty(), LoadContext::default())
                .wait()
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), Some(503));
        }
        assert_eq!(fixture.loader.calls(), 2);
        assert!(manager.failed_urls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_loader_never_requests() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager();

        let load = manager.load_image(URL, WebImageOptions::empty(), LoadContext::default());
        load.cancel();
        load.cancel();
        assert!(load.operation().is_cancelled());
        assert_eq!(load.wait().await.unwrap_err(), WebImageError::Cancelled);

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fixture.loader.calls(), 0);
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_cache_only_miss_completes_empty() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager();

        let result = manager
            .load_image(URL, WebImageOptions::FROM_CACHE_ONLY, LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert!(result.image.is_none());
        assert_eq!(result.cache_type, CacheType::None);
        assert_eq!(fixture.loader.calls(), 0);
    }

    #[tokio::test]
    async fn test_disk_hit_is_promoted() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        fixture
            .cache
            .store(None, Some(png_bytes()), URL, CacheType::Disk)
            .await
            .unwrap();
        let manager = fixture.manager();

        let result = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert_eq!(result.cache_type, CacheType::Disk);
        assert_eq!(result.image.unwrap().width(), 3);
        assert_eq!(fixture.loader.calls(), 0);
        assert!(fixture.cache.image_from_memory(URL).is_some());
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        fixture
            .cache
            .store(None, Some(Bytes::from_static(b"not an image")), URL, CacheType::Disk)
            .await
            .unwrap();
        let manager = fixture.manager();

        let err = manager
            .load_image(URL, WebImageOptions::FROM_CACHE_ONLY, LoadContext::default())
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, WebImageError::BadImageData { .. }));
        assert_eq!(fixture.loader.calls(), 0);

        let result = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert_eq!(result.cache_type, CacheType::None);
        assert_eq!(result.image.unwrap().width(), 4);
        assert_eq!(fixture.loader.calls(), 1);
        assert!(!manager.failed_urls().contains(&Url::parse(URL).unwrap()));
    }

    #[tokio::test]
    async fn test_refresh_delivers_cached_then_network() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager();
        manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();

        let events = events(manager.load_image(
            URL,
            WebImageOptions::REFRESH_CACHED,
            LoadContext::default(),
        ))
        .await;
        assert!(matches!(
            events.first(),
            Some(LoadEvent::Partial(ImageResult {
                cache_type: CacheType::Memory,
                finished: false,
                ..
            }))
        ));
        assert!(matches!(
            events.last(),
            Some(LoadEvent::Completed(Ok(ImageResult {
                cache_type: CacheType::None,
                finished: true,
                ..
            })))
        ));
        assert_eq!(fixture.loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_not_modified_keeps_cached_result() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager();
        manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();

        fixture.loader.set_result(Err(WebImageError::CacheNotModified));
        let result = manager
            .load_image(URL, WebImageOptions::REFRESH_CACHED, LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert_eq!(result.cache_type, CacheType::Memory);
        assert!(result.finished);
        assert!(manager.failed_urls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_fails_fast() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager();
        for url in ["", "not a url", "   "] {
            let err = manager
                .load_image(url, WebImageOptions::empty(), LoadContext::default())
                .wait()
                .await
                .unwrap_err();
            assert!(matches!(err, WebImageError::InvalidUrl { .. }), "{url:?}");
        }
        assert_eq!(fixture.loader.calls(), 0);
        assert!(!manager.is_running());
    }

    struct Shrink;

    impl ImageTransformer for Shrink {
        fn key(&self) -> String {
            "shrink".to_string()
        }

        fn transform(&self, image: &WebImage, _key: &str) -> Option<WebImage> {
            Some(WebImage::new(image.bitmap().thumbnail_exact(2, 2), image.format()))
        }
    }

    #[tokio::test]
    async fn test_transformer_stores_both_variants() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager().with_transformer(Arc::new(Shrink));
        let context = LoadContext {
            original_store_cache_type: Some(CacheType::Memory),
            ..LoadContext::default()
        };

        let result = manager
            .load_image(URL, WebImageOptions::empty(), context)
            .wait()
            .await
            .unwrap();
        assert_eq!(result.image.unwrap().width(), 2);

        let transformed = fixture
            .cache
            .image_from_memory(&transformed_key(URL, "shrink"))
            .unwrap();
        assert_eq!(transformed.width(), 2);
        assert_eq!(fixture.cache.image_from_memory(URL).unwrap().width(), 4);
    }

    #[tokio::test]
    async fn test_cache_key_filter_and_serializer() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let serialized = Arc::new(AtomicUsize::new(0));
        let counter = serialized.clone();
        let manager = fixture
            .manager()
            .with_cache_key_filter(Arc::new(|_: &Url| Some("custom-key".to_string())))
            .with_cache_serializer(Arc::new(
                move |_: &WebImage, data: Option<&Bytes>, _: Option<&Url>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    data.cloned()
                },
            ));

        manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert!(fixture.cache.image_from_memory("custom-key").is_some());
        assert!(fixture.cache.image_from_memory(URL).is_none());
        assert_eq!(serialized.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.cache_key_for_url(&Url::parse(URL).unwrap(), None),
            "custom-key"
        );
    }

    struct Veto {
        download: bool,
        block: Option<bool>,
    }

    impl ManagerDelegate for Veto {
        fn should_download(&self, _url: &Url) -> bool {
            self.download
        }

        fn should_block_failed_url(&self, _url: &Url, _error: &WebImageError) -> Option<bool> {
            self.block
        }
    }

    #[tokio::test]
    async fn test_delegate_decisions() {
        let fixture = Fixture::new(MockImageLoader::failing(
            WebImageError::bad_data("corrupt"),
            true,
        ));
        let manager = fixture.manager().with_delegate(Arc::new(Veto {
            download: false,
            block: None,
        }));
        let result = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert!(result.image.is_none());
        assert_eq!(fixture.loader.calls(), 0);

        let manager = fixture.manager().with_delegate(Arc::new(Veto {
            download: true,
            block: Some(false),
        }));
        let _ = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await;
        assert_eq!(fixture.loader.calls(), 1);
        assert!(manager.failed_urls().is_empty());
    }

    struct CacheOnly;

    impl OptionsProcessor for CacheOnly {
        fn process(
            &self,
            _url: &Url,
            options: WebImageOptions,
            context: LoadContext,
        ) -> (WebImageOptions, LoadContext) {
            (options | WebImageOptions::FROM_CACHE_ONLY, context)
        }
    }

    #[tokio::test]
    async fn test_options_processor_applies() {
        let fixture = Fixture::new(MockImageLoader::succeeding());
        let manager = fixture.manager().with_options_processor(Arc::new(CacheOnly));
        let result = manager
            .load_image(URL, WebImageOptions::empty(), LoadContext::default())
            .wait()
            .await
            .unwrap();
        assert!(result.image.is_none());
        assert_eq!(fixture.loader.calls(), 0);
    }

    /// Loader that never answers and counts cancellations.
    #[derive(Default)]
    struct PendingLoader {
        sinks: Mutex<Vec<LoaderSink>>,
        cancels: Arc<AtomicUsize>,
    }

    struct PendingRequest(Arc<AtomicUsize>);

    impl Cancellable for PendingRequest {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst) > 0
        }
    }

    impl ImageLoaderPort for PendingLoader {
        fn can_request_image(&self, _url: &Url) -> bool {
            true
        }

        fn request_image(
            &self,
            _url: &Url,
            _options: WebImageOptions,
            _context: &LoadContext,
            sink: LoaderSink,
        ) -> Arc<dyn Cancellable> {
            self.sinks.lock().push(sink);
            Arc::new(PendingRequest(self.cancels.clone()))
        }

        fn should_block_failed_url(&self, _url: &Url, _error: &WebImageError) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_cancel_all_reaches_running_loaders() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ImageCache::new("test", Some(dir.path()), CacheConfig::default()).unwrap());
        let loader = Arc::new(PendingLoader::default());
        let manager = ImageManager::new(cache, loader.clone())
            .with_failed_urls(Arc::new(FailedUrls::new()));

        let loads = vec![
            manager.load_image(URL, WebImageOptions::empty(), LoadContext::default()),
            manager.load_image(
                "https://img.example.com/other.png",
                WebImageOptions::empty(),
                LoadContext::default(),
            ),
        ];
        for _ in 0..200 {
            if loader.sinks.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(manager.running_count(), 2);

        manager.cancel_all();
        for load in loads {
            assert_eq!(load.wait().await.unwrap_err(), WebImageError::Cancelled);
        }
        assert_eq!(loader.cancels.load(Ordering::SeqCst), 2);
        assert!(!manager.is_running());
    }
}
