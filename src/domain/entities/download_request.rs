//! Outgoing download request description.

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use super::WebImageOptions;

/// One HTTP GET as the downloader is about to issue it.
///
/// Request modifiers receive and return this value, so every field is
/// public.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    /// Target URL.
    pub url: Url,
    /// Header map sent with the request.
    pub headers: BTreeMap<String, String>,
    /// Overall timeout. Zero disables it.
    pub timeout: Duration,
    /// Options of the load that triggered the download.
    pub options: WebImageOptions,
}

impl DownloadRequest {
    /// Creates a request with no headers.
    #[must_use]
    pub fn new(url: Url, timeout: Duration, options: WebImageOptions) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
            timeout,
            options,
        }
    }

    /// Timeout to enforce, `None` when disabled.
    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Sets a header, replacing an existing value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
