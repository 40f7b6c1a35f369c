//! Downloader configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Order in which queued downloads are started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Oldest queued request first.
    #[default]
    Fifo,
    /// Newest queued request first.
    Lifo,
}

/// Download manager limits and request defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Downloads running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Per-request timeout in seconds, 0 for none.
    #[serde(default = "default_timeout_secs")]
    pub download_timeout: u64,

    /// Minimum progress step, as a fraction of the expected size, between
    /// two progress events. 0 reports every chunk.
    #[serde(default)]
    pub minimum_progress_interval: f64,

    /// Queue discipline.
    #[serde(default)]
    pub execution_order: ExecutionOrder,

    /// `User-Agent` header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Extra headers sent with every request.
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

impl DownloaderConfig {
    /// Timeout as a duration.
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout)
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            download_timeout: default_timeout_secs(),
            minimum_progress_interval: 0.0,
            execution_order: ExecutionOrder::default(),
            user_agent: default_user_agent(),
            headers: default_headers(),
        }
    }
}

const fn default_max_concurrent() -> usize {
    6
}

const fn default_timeout_secs() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("{}/{}", crate::NAME, crate::VERSION)
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "Accept".to_string(),
        "image/*,*/*;q=0.8".to_string(),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DownloaderConfig::default();
        assert_eq!(config.max_concurrent_downloads, 6);
        assert_eq!(config.download_timeout(), Duration::from_secs(15));
        assert_eq!(config.execution_order, ExecutionOrder::Fifo);
        assert!(config.user_agent.starts_with("pixfetch/"));
    }

    #[test]
    fn test_parse_toml() {
        let config: DownloaderConfig = toml::from_str(
            r#"
            execution_order = "lifo"
            max_concurrent_downloads = 2

            [headers]
            Referer = "https://example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.execution_order, ExecutionOrder::Lifo);
        assert_eq!(config.max_concurrent_downloads, 2);
        assert_eq!(config.headers.get("Referer").unwrap(), "https://example.com");
        assert_eq!(config.download_timeout, 15);
    }
}
