//! Hooks that customize a single load without replacing a whole component.

use bytes::Bytes;
use url::Url;

use crate::domain::entities::{DownloadRequest, LoadContext, WebImage, WebImageOptions};
use crate::domain::errors::WebImageError;

/// Maps a URL to its cache key. Returning `None` falls back to the URL string.
pub trait CacheKeyFilter: Send + Sync {
    /// Derives the cache key for `url`.
    fn cache_key(&self, url: &Url) -> Option<String>;
}

impl<F> CacheKeyFilter for F
where
    F: Fn(&Url) -> Option<String> + Send + Sync,
{
    fn cache_key(&self, url: &Url) -> Option<String> {
        self(url)
    }
}

/// Chooses the bytes written to disk for a freshly loaded image.
pub trait CacheSerializer: Send + Sync {
    /// Returns the bytes to persist, or `None` to let the cache encode the
    /// image itself.
    fn cache_data(&self, image: &WebImage, data: Option<&Bytes>, url: Option<&Url>)
    -> Option<Bytes>;
}

impl<F> CacheSerializer for F
where
    F: Fn(&WebImage, Option<&Bytes>, Option<&Url>) -> Option<Bytes> + Send + Sync,
{
    fn cache_data(
        &self,
        image: &WebImage,
        data: Option<&Bytes>,
        url: Option<&Url>,
    ) -> Option<Bytes> {
        self(image, data, url)
    }
}

/// Post-processes a loaded image before it is cached and delivered.
pub trait ImageTransformer: Send + Sync {
    /// Identifier appended to cache keys of transformed images.
    fn key(&self) -> String;

    /// Returns the transformed image, or `None` to keep the original.
    fn transform(&self, image: &WebImage, key: &str) -> Option<WebImage>;
}

/// Rewrites a download request right before it is sent.
/// Returning `None` aborts the download.
pub trait RequestModifier: Send + Sync {
    /// Produces the request to send.
    fn modify(&self, request: DownloadRequest) -> Option<DownloadRequest>;
}

impl<F> RequestModifier for F
where
    F: Fn(DownloadRequest) -> Option<DownloadRequest> + Send + Sync,
{
    fn modify(&self, request: DownloadRequest) -> Option<DownloadRequest> {
        self(request)
    }
}

/// Adjusts options and context for every load issued through a manager.
pub trait OptionsProcessor: Send + Sync {
    /// Returns the effective options and context for `url`.
    fn process(
        &self,
        url: &Url,
        options: WebImageOptions,
        context: LoadContext,
    ) -> (WebImageOptions, LoadContext);
}

/// Policy hooks consulted by the image manager.
pub trait ManagerDelegate: Send + Sync {
    /// Returns false to skip the network after a cache miss.
    fn should_download(&self, _url: &Url) -> bool {
        true
    }

    /// Overrides the loader's blacklist decision when it returns `Some`.
    fn should_block_failed_url(&self, _url: &Url, _error: &WebImageError) -> Option<bool> {
        None
    }
}
