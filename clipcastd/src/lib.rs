use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clipcast_core::{
    CatalogError, CatalogPool, CatalogService, CatalogSettings, ClipDownloader, Config,
    ConfigError, DownloadError, FfprobeProber, HelixClient, PreloadPool, SinkError, StreamingSink,
    TelegramNotifier,
};

/// The reference deployment restarts daily; bounding the run keeps the RTMP
/// session and the catalog from aging indefinitely.
const RUN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Parser)]
#[command(name = "clipcastd", about = "24/7 clip re-broadcast streamer")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,
    /// Scratch directory for downloaded media; wiped on startup.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,clipcast_core=debug,clipcastd=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn notify(notifier: &Option<TelegramNotifier>, text: &str) {
    if let Some(notifier) = notifier {
        if let Err(err) = notifier.notify(text).await {
            warn!(error = %err, "telegram notification failed");
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), DaemonError> {
    let config = Config::load(&cli.config)?;
    init_tracing();

    info!(
        environment = %config.sentry.environment,
        channels = config.twitch.broadcaster_ids.len(),
        "clipcast starting"
    );
    let notifier = TelegramNotifier::from_config(&config);
    notify(&notifier, "clipcast restarted").await;

    // recover whatever a previous crash left behind
    let _ = std::fs::remove_dir_all(&cli.data_dir);
    std::fs::create_dir_all(&cli.data_dir).map_err(|source| DaemonError::Io {
        source,
        path: cli.data_dir.clone(),
    })?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RUN_LIFETIME).await;
            info!("run lifetime reached, shutting down");
            cancel.cancel();
        });
    }

    let helix = Arc::new(HelixClient::new(
        config.twitch.client_id.clone(),
        config.twitch.client_secret.clone(),
    )?);
    let downloader = Arc::new(ClipDownloader::new()?);
    let prober = Arc::new(FfprobeProber);
    let pool = Arc::new(CatalogPool::new());

    let catalog = CatalogService::new(
        CatalogSettings::from_config(&config, cli.data_dir.clone()),
        helix,
        downloader,
        prober,
        Arc::clone(&pool),
    );
    match catalog.init(&cancel).await {
        Ok(()) => {}
        Err(CatalogError::Cancelled) => return Ok(()),
        Err(err) => {
            notify(&notifier, &format!("clipcast startup failed: {err}")).await;
            return Err(err.into());
        }
    }

    let preload = PreloadPool::new(
        pool,
        config.stream.preload_count,
        config.stream.preload_workers,
    );
    let sink = StreamingSink::new(
        config.twitch.rtmp_url.clone(),
        &config.stream,
        preload,
        None,
    );
    let result = sink.run(&cancel).await;
    cancel.cancel();

    match result {
        Ok(()) => {
            info!("stream finished");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "streaming failed");
            notify(&notifier, &format!("clipcast stream failed: {err}")).await;
            Err(err.into())
        }
    }
}
