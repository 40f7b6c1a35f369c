//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::args::CliArgs;
use crate::infrastructure::cache::{CacheConfig, DEFAULT_NAMESPACE};
use crate::infrastructure::download::DownloaderConfig;

const APP_NAME: &str = "pixfetch";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "pixfetch";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Configuration loaded from `config.toml`, overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path. Logs go nowhere unless a path is known.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache namespace, the directory name under the cache root.
    #[serde(default = "default_namespace")]
    pub cache_namespace: String,

    /// Cache root. Defaults to the platform cache directory.
    #[serde(default)]
    pub cache_directory: Option<PathBuf>,

    /// Memory and disk cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Download queue settings.
    #[serde(default)]
    pub downloader: DownloaderConfig,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(namespace) = &args.namespace {
            self.cache_namespace.clone_from(namespace);
        }
        if let Some(directory) = &args.cache_dir {
            self.cache_directory = Some(directory.clone());
        }
        if let Some(max) = args.max_concurrent_downloads.filter(|max| *max > 0) {
            self.downloader.max_concurrent_downloads = max;
        }
        if let Some(timeout) = args.download_timeout {
            self.downloader.download_timeout = timeout;
        }
    }

    /// Replaces values the runtime cannot honor. Returns the names of the
    /// fields that were changed.
    pub fn normalize(&mut self) -> Vec<&'static str> {
        let mut fixed = Vec::new();
        if self.downloader.max_concurrent_downloads == 0 {
            self.downloader.max_concurrent_downloads =
                DownloaderConfig::default().max_concurrent_downloads;
            fixed.push("downloader.max_concurrent_downloads");
        }
        let interval = self.downloader.minimum_progress_interval;
        if !(0.0..=1.0).contains(&interval) {
            self.downloader.minimum_progress_interval = if interval > 1.0 { 1.0 } else { 0.0 };
            fixed.push("downloader.minimum_progress_interval");
        }
        if self.cache_namespace.trim().is_empty() {
            self.cache_namespace = default_namespace();
            fixed.push("cache_namespace");
        }
        fixed
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("pixfetch.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            cache_namespace: default_namespace(),
            cache_directory: None,
            cache: CacheConfig::default(),
            downloader: DownloaderConfig::default(),
        }
    }
}
