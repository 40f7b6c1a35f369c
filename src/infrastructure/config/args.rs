use super::app_config::LogLevel;
use crate::domain::entities::CacheType;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "pixfetch",
    version,
    about = "Fetch images through a two-tier memory and disk cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Cache namespace.
    #[arg(long, env = "PIXFETCH_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Cache root directory.
    #[arg(long, value_name = "PATH", env = "PIXFETCH_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Downloads running at once.
    #[arg(long, global = true)]
    pub max_concurrent_downloads: Option<usize>,

    /// Per-request timeout in seconds, 0 for none.
    #[arg(long, value_name = "SECS", global = true)]
    pub download_timeout: Option<u64>,

    /// Action to run.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load an image through the cache, downloading it on a miss.
    Fetch {
        /// Image URL.
        url: String,

        /// Write the image bytes to this file.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Revalidate a cached image against the server.
        #[arg(long)]
        refresh: bool,

        /// Never touch the network.
        #[arg(long, conflicts_with = "refresh")]
        cache_only: bool,

        /// Retry a URL previously marked as failed.
        #[arg(long)]
        retry_failed: bool,

        /// Report partial previews while downloading.
        #[arg(long)]
        progressive: bool,
    },
    /// Print cache location, size and entry count.
    Info,
    /// Remove cached images.
    Clear {
        /// Tiers to clear.
        #[arg(long, value_enum, default_value_t = Scope::All)]
        scope: Scope,
    },
    /// Remove expired disk entries and enforce the size limit.
    Expire,
    /// Move cache files from an older directory into the current one.
    Migrate {
        /// Previous cache directory.
        from: PathBuf,
        /// Destination directory.
        to: PathBuf,
    },
}

/// Cache tiers selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    /// Memory tier only.
    Memory,
    /// Disk tier only.
    Disk,
    /// Both tiers.
    All,
}

impl From<Scope> for CacheType {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Memory => Self::Memory,
            Scope::Disk => Self::Disk,
            Scope::All => Self::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_flags() {
        let args = CliArgs::parse_from([
            "pixfetch",
            "fetch",
            "https://example.com/a.png",
            "-o",
            "a.png",
            "--retry-failed",
        ]);
        match args.command {
            Command::Fetch {
                url,
                output,
                refresh,
                cache_only,
                retry_failed,
                progressive,
            } => {
                assert_eq!(url, "https://example.com/a.png");
                assert_eq!(output, Some(PathBuf::from("a.png")));
                assert!(retry_failed);
                assert!(!refresh && !cache_only && !progressive);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_refresh_conflicts_with_cache_only() {
        let result = CliArgs::try_parse_from([
            "pixfetch",
            "fetch",
            "https://example.com/a.png",
            "--refresh",
            "--cache-only",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_clear_scope_defaults_to_all() {
        let args = CliArgs::parse_from(["pixfetch", "clear"]);
        assert!(matches!(args.command, Command::Clear { scope: Scope::All }));

        let args = CliArgs::parse_from(["pixfetch", "clear", "--scope", "disk"]);
        match args.command {
            Command::Clear { scope } => assert_eq!(CacheType::from(scope), CacheType::Disk),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
