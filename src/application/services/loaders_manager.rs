//! Routes requests to the first loader that accepts the URL.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::domain::entities::{LoadContext, WebImageOptions};
use crate::domain::errors::WebImageError;
use crate::domain::ports::{
    Cancellable, CompletedOperation, ImageLoaderPort, LoaderEvent, LoaderSink,
};

/// Ordered loader collection. The most recently added loader is asked
/// first.
#[derive(Default)]
pub struct ImageLoadersManager {
    loaders: RwLock<Vec<Arc<dyn ImageLoaderPort>>>,
}

impl ImageLoadersManager {
    /// Creates a manager over `loaders`, lowest priority first.
    #[must_use]
    pub fn new(loaders: Vec<Arc<dyn ImageLoaderPort>>) -> Self {
        Self {
            loaders: RwLock::new(loaders),
        }
    }

    /// Snapshot of the loader list.
    #[must_use]
    pub fn loaders(&self) -> Vec<Arc<dyn ImageLoaderPort>> {
        self.loaders.read().clone()
    }

    /// Adds `loader` with the highest priority.
    pub fn add_loader(&self, loader: Arc<dyn ImageLoaderPort>) {
        self.loaders.write().push(loader);
    }

    /// Removes `loader` (compared by identity).
    pub fn remove_loader(&self, loader: &Arc<dyn ImageLoaderPort>) {
        self.loaders.write().retain(|l| !Arc::ptr_eq(l, loader));
    }

    fn loader_for(&self, url: &Url) -> Option<Arc<dyn ImageLoaderPort>> {
        self.loaders
            .read()
            .iter()
            .rev()
            .find(|l| l.can_request_image(url))
            .cloned()
    }
}

impl ImageLoaderPort for ImageLoadersManager {
    fn can_request_image(&self, url: &Url) -> bool {
        self.loader_for(url).is_some()
    }

    fn request_image(
        &self,
        url: &Url,
        options: WebImageOptions,
        context: &LoadContext,
        sink: LoaderSink,
    ) -> Arc<dyn Cancellable> {
        if let Some(loader) = self.loader_for(url) {
            debug!(url = %url, "Dispatching to loader");
            return loader.request_image(url, options, context, sink);
        }
        warn!(url = %url, "No loader accepts URL");
        let _ = sink.send(LoaderEvent::Finished(Err(WebImageError::invalid_url(
            "no loader can handle this URL",
        ))));
        Arc::new(CompletedOperation)
    }

    fn should_block_failed_url(&self, url: &Url, error: &WebImageError) -> bool {
        self.loader_for(url)
            .is_some_and(|loader| loader.should_block_failed_url(url, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockImageLoader;
    use tokio::sync::mpsc;

    struct SchemeLoader {
        scheme: &'static str,
        inner: MockImageLoader,
    }

    impl ImageLoaderPort for SchemeLoader {
        fn can_request_image(&self, url: &Url) -> bool {
            url.scheme() == self.scheme
        }

        fn request_image(
            &self,
            url: &Url,
            options: WebImageOptions,
            context: &LoadContext,
            sink: LoaderSink,
        ) -> Arc<dyn Cancellable> {
            self.inner.request_image(url, options, context, sink)
        }

        fn should_block_failed_url(&self, url: &Url, error: &WebImageError) -> bool {
            self.inner.should_block_failed_url(url, error)
        }
    }

    #[test]
    fn test_routes_by_url_and_priority() {
        let https = Arc::new(SchemeLoader {
            scheme: "https",
            inner: MockImageLoader::succeeding(),
        });
        let newer_https = Arc::new(SchemeLoader {
            scheme: "https",
            inner: MockImageLoader::succeeding(),
        });
        let file = Arc::new(SchemeLoader {
            scheme: "file",
            inner: MockImageLoader::succeeding(),
        });
        let manager = ImageLoadersManager::new(vec![https.clone(), file.clone()]);
        manager.add_loader(newer_https.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let url = Url::parse("https://example.com/a.png").unwrap();
        manager.request_image(&url, WebImageOptions::empty(), &LoadContext::default(), tx);
        assert_eq!(newer_https.inner.calls(), 1);
        assert_eq!(https.inner.calls(), 0);

        let as_port: Arc<dyn ImageLoaderPort> = newer_https.clone();
        manager.remove_loader(&as_port);
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.request_image(&url, WebImageOptions::empty(), &LoadContext::default(), tx);
        assert_eq!(https.inner.calls(), 1);
        assert_eq!(file.inner.calls(), 0);
    }

    #[test]
    fn test_unhandled_url_fails_immediately() {
        let manager = ImageLoadersManager::default();
        let url = Url::parse("ftp://example.com/a.png").unwrap();
        assert!(!manager.can_request_image(&url));
        assert!(!manager.should_block_failed_url(&url, &WebImageError::bad_data("x")));

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.request_image(&url, WebImageOptions::empty(), &LoadContext::default(), tx);
        assert!(matches!(
            rx.try_recv(),
            Ok(LoaderEvent::Finished(Err(WebImageError::InvalidUrl { .. })))
        ));
    }
}
