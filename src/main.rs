use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixfetch::application::{ImageLoadersManager, ImageManager, ImageResult, LoadEvent};
use pixfetch::domain::entities::{ImageFormat, LoadContext, WebImageOptions};
use pixfetch::domain::ports::{CoderOptions, ImageCoder, ImageLoaderPort};
use pixfetch::infrastructure::config::Command;
use pixfetch::infrastructure::{
    AppConfig, CliArgs, CodersManager, ConfigStore, DiskImageCache, ImageCache, ImageDownloader,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let store = match &args.config {
        Some(path) => ConfigStore::with_dir(
            path.parent()
                .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf),
        ),
        None => ConfigStore::new()?,
    };
    let mut config = store.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn fetch_options(
    refresh: bool,
    cache_only: bool,
    retry_failed: bool,
    progressive: bool,
) -> WebImageOptions {
    let mut options = WebImageOptions::empty();
    options.set(WebImageOptions::REFRESH_CACHED, refresh);
    options.set(WebImageOptions::FROM_CACHE_ONLY, cache_only);
    options.set(WebImageOptions::RETRY_FAILED, retry_failed);
    options.set(WebImageOptions::PROGRESSIVE_LOAD, progressive);
    options
}

fn image_bytes(result: &ImageResult) -> Result<Option<Bytes>> {
    if let Some(data) = &result.data {
        return Ok(Some(data.clone()));
    }
    let Some(image) = &result.image else {
        return Ok(None);
    };
    let coders = CodersManager::shared();
    let format = if coders.can_encode(image.format()) {
        image.format()
    } else {
        ImageFormat::Undefined
    };
    Ok(Some(coders.encode(image, format, &CoderOptions::default())?))
}

async fn fetch(
    config: &AppConfig,
    cache: Arc<ImageCache>,
    url: &str,
    output: Option<&Path>,
    options: WebImageOptions,
) -> Result<()> {
    let downloader: Arc<dyn ImageLoaderPort> =
        Arc::new(ImageDownloader::with_config(config.downloader.clone())?);
    let loaders = ImageLoadersManager::new(vec![downloader]);
    let manager = ImageManager::new(cache, Arc::new(loaders));

    let mut load = manager.load_image(url, options, LoadContext::default());
    let mut stderr = std::io::stderr();
    while let Some(event) = load.next_event().await {
        match event {
            LoadEvent::Progress {
                received, expected, ..
            } => {
                match expected {
                    Some(total) => write!(stderr, "\r{received}/{total} bytes")?,
                    None => write!(stderr, "\r{received} bytes")?,
                }
                stderr.flush()?;
            }
            LoadEvent::Partial(partial) => {
                if let Some(image) = &partial.image {
                    writeln!(
                        stderr,
                        "\rpreview {}x{} ({})",
                        image.width(),
                        image.height(),
                        partial.cache_type
                    )?;
                }
            }
            LoadEvent::Completed(result) => {
                let result = result?;
                let Some(image) = &result.image else {
                    writeln!(stderr, "{url}: not cached")?;
                    return Ok(());
                };
                println!(
                    "{url}: {}x{} {:?}, {} frame(s), source {}",
                    image.width(),
                    image.height(),
                    image.format(),
                    image.frame_count(),
                    result.cache_type
                );
                if let Some(path) = output {
                    let data = image_bytes(&result)?
                        .ok_or_else(|| eyre!("no encodable data for {url}"))?;
                    tokio::fs::write(path, &data).await?;
                    info!(path = %path.display(), bytes = data.len(), "Image written");
                }
                return Ok(());
            }
        }
    }
    Err(eyre!("load of {url} ended without a result"))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = pixfetch::VERSION, "Starting pixfetch");

    let cache = Arc::new(ImageCache::new(
        &config.cache_namespace,
        config.cache_directory.as_deref(),
        config.cache.clone(),
    )?);

    match args.command {
        Command::Fetch {
            url,
            output,
            refresh,
            cache_only,
            retry_failed,
            progressive,
        } => {
            let options = fetch_options(refresh, cache_only, retry_failed, progressive);
            fetch(&config, cache, &url, output.as_deref(), options).await?;
        }
        Command::Info => {
            println!("namespace: {}", config.cache_namespace);
            let directory = config.cache_directory.as_ref().map_or_else(
                || DiskImageCache::default_directory(&config.cache_namespace),
                |root| root.join(&config.cache_namespace),
            );
            println!("directory: {}", directory.display());
            println!("files:     {}", cache.total_disk_count().await);
            println!("size:      {} bytes", cache.total_disk_size().await);
        }
        Command::Clear { scope } => {
            cache.clear(scope.into()).await?;
            println!("cleared {scope:?}");
        }
        Command::Expire => {
            let report = cache.remove_expired_data().await?;
            println!(
                "expired {}, evicted {}, freed {} bytes",
                report.expired, report.evicted, report.freed_bytes
            );
        }
        Command::Migrate { from, to } => {
            cache.migrate_disk_cache(&from, &to).await?;
            println!("moved {} to {}", from.display(), to.display());
        }
    }

    Ok(())
}
