use super::app_config::AppConfig;
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "pixfetch";
const APP_NAME: &str = "pixfetch";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Location of `config.toml` and the logic to read it.
///
/// A missing file is created with the defaults. An unreadable or malformed
/// file is never overwritten: the defaults are used for this run only.
pub struct ConfigStore {
    config_dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted in the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigDirNotFound` on platforms without a home
    /// directory.
    pub fn new() -> Result<Self, ConfigError> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| Self::with_dir(dirs.config_dir().to_path_buf()))
            .ok_or(ConfigError::ConfigDirNotFound)
    }

    /// Store rooted at `path`.
    #[must_use]
    pub fn with_dir(path: PathBuf) -> Self {
        Self { config_dir: path }
    }

    /// Directory holding `config.toml`.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Default config file path inside the store.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads the configuration from `path_override` or the default path,
    /// then normalizes it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a missing file cannot be created or an
    /// existing one cannot be read.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let path = path_override.map_or_else(|| self.config_path(), Path::to_path_buf);

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str::<AppConfig>(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Malformed config, using defaults");
                AppConfig::default()
            })
        } else {
            info!(path = %path.display(), "Writing default config");
            let config = AppConfig::default();
            write_atomic(&path, &config)?;
            config
        };

        for field in config.normalize() {
            warn!(field, "Config value out of range, using default");
        }
        debug!(path = %path.display(), namespace = %config.cache_namespace, "Config loaded");
        Ok(config)
    }

    /// Writes `config` to the default path, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if serialization or the write fails.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        write_atomic(&self.config_path(), config)
    }
}

fn write_atomic(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
