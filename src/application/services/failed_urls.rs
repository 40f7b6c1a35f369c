//! Process-wide set of URLs that failed permanently.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;
use url::Url;

static SHARED: OnceLock<Arc<FailedUrls>> = OnceLock::new();

/// URLs marked unrecoverable. Loads for them fail immediately unless
/// retried explicitly.
#[derive(Debug, Default)]
pub struct FailedUrls {
    urls: Mutex<HashSet<String>>,
}

impl FailedUrls {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance.
    pub fn shared() -> Arc<Self> {
        SHARED.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Installs the process-wide instance.
    ///
    /// # Errors
    /// Returns the rejected set if `shared()` was already initialized.
    pub fn install_shared(urls: Arc<Self>) -> Result<(), Arc<Self>> {
        SHARED.set(urls)
    }

    /// Returns true if `url` is marked failed.
    #[must_use]
    pub fn contains(&self, url: &Url) -> bool {
        self.urls.lock().contains(url.as_str())
    }

    /// Marks `url` as failed. Returns false if it already was.
    pub fn insert(&self, url: &Url) -> bool {
        let inserted = self.urls.lock().insert(url.to_string());
        if inserted {
            debug!(url = %url, "URL marked as failed");
        }
        inserted
    }

    /// Clears the mark on `url`. Returns false if it was not marked.
    pub fn remove(&self, url: &Url) -> bool {
        self.urls.lock().remove(url.as_str())
    }

    /// Clears every mark.
    pub fn clear(&self) {
        self.urls.lock().clear();
    }

    /// Number of marked URLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.lock().len()
    }

    /// Returns true if nothing is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.lock().is_empty()
    }
}
