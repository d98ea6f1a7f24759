mod downloader;
mod probe;
pub mod testing;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::catalog::Clip;

pub use downloader::{ClipDownloader, ClipFetcher, DownloadError, DownloadResult};
pub use probe::{DurationProber, FfprobeProber, ProbeError, ProbeResult};

const DOWNLOAD_ATTEMPTS: usize = 3;
const DOWNLOAD_RETRY_SLEEP: Duration = Duration::from_secs(1);

/// One-shot latch observable by any number of waiters. Fires when the
/// handle's preparation reaches a terminal state; late observers resolve
/// immediately.
pub struct ReadySignal {
    rx: watch::Receiver<bool>,
}

impl ReadySignal {
    pub async fn wait(mut self) {
        // the sender lives inside the handle, which every waiter holds
        let _ = self.rx.wait_for(|ready| *ready).await;
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Per-clip lifecycle: `fresh → preparing → (ready | failed)`.
///
/// Preparation downloads the media to `local_path` and probes its precise
/// duration. It is driven at most once no matter how many tasks observe the
/// handle, and the ready latch fires on every terminal path. `downloaded` is
/// true only in the `ready` state, in which case the file exists and the
/// measured duration is set.
pub struct ClipHandle {
    clip: Clip,
    local_path: PathBuf,
    prepare_started: AtomicBool,
    downloaded: AtomicBool,
    measured: OnceLock<Duration>,
    ready_tx: watch::Sender<bool>,
    fetcher: Arc<dyn ClipFetcher>,
    prober: Arc<dyn DurationProber>,
}

impl ClipHandle {
    pub fn new(
        clip: Clip,
        data_dir: &Path,
        fetcher: Arc<dyn ClipFetcher>,
        prober: Arc<dyn DurationProber>,
    ) -> Arc<Self> {
        let local_path = data_dir.join(format!("{}.mp4", clip.id));
        let (ready_tx, _) = watch::channel(false);
        Arc::new(Self {
            clip,
            local_path,
            prepare_started: AtomicBool::new(false),
            downloaded: AtomicBool::new(false),
            measured: OnceLock::new(),
            ready_tx,
            fetcher,
            prober,
        })
    }

    pub fn clip(&self) -> &Clip {
        &self.clip
    }

    /// Starts preparation in the background and returns the ready latch.
    /// Idempotent: only the first caller spawns work, every caller gets a
    /// latch for the same preparation.
    pub fn prepare(self: Arc<Self>, cancel: &CancellationToken) -> ReadySignal {
        if self
            .prepare_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let handle = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { handle.run_preparation(cancel).await });
        }
        self.ready_signal()
    }

    pub fn ready_signal(&self) -> ReadySignal {
        ReadySignal {
            rx: self.ready_tx.subscribe(),
        }
    }

    /// Local media path plus whether preparation finished successfully.
    /// Observation only; never blocks.
    pub fn downloaded_file(&self) -> (PathBuf, bool) {
        (
            self.local_path.clone(),
            self.downloaded.load(Ordering::SeqCst),
        )
    }

    /// Probed duration, or `None` while unknown (not yet prepared, or
    /// preparation failed).
    pub fn measured_duration(&self) -> Option<Duration> {
        self.measured.get().copied()
    }

    /// Removes the on-disk media. Safe to call repeatedly and from any state
    /// once the ready latch has fired.
    pub async fn release(&self) {
        let _ = tokio::fs::remove_file(&self.local_path).await;
    }

    async fn run_preparation(self: Arc<Self>, cancel: CancellationToken) {
        match self.download_with_retries(&cancel).await {
            Ok(()) => match self.prober.probe(&self.local_path).await {
                Ok(measured) => {
                    let _ = self.measured.set(measured);
                    self.downloaded.store(true, Ordering::SeqCst);
                    debug!(
                        clip_id = %self.clip.id,
                        secs = measured.as_secs_f64(),
                        "clip prepared"
                    );
                }
                Err(err) => {
                    error!(
                        clip_id = %self.clip.id,
                        error = %err,
                        "duration probe failed, discarding clip"
                    );
                    self.release().await;
                }
            },
            Err(abort) => {
                if matches!(abort, PrepareAbort::Exhausted) {
                    error!(clip_id = %self.clip.id, "giving up on clip download");
                }
                // drop whatever partial file the failed attempt left behind
                self.release().await;
            }
        }
        let _ = self.ready_tx.send(true);
    }

    async fn download_with_retries(&self, cancel: &CancellationToken) -> Result<(), PrepareAbort> {
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(PrepareAbort::Cancelled),
                result = self.fetcher.fetch(&self.clip.id, &self.local_path) => result,
            };
            match result {
                Ok(()) => {
                    debug!(clip_id = %self.clip.id, attempt, "clip download finished");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        clip_id = %self.clip.id,
                        attempt,
                        max_attempts = DOWNLOAD_ATTEMPTS,
                        error = %err,
                        "clip download failed"
                    );
                    if attempt == DOWNLOAD_ATTEMPTS {
                        break;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PrepareAbort::Cancelled),
                        _ = tokio::time::sleep(DOWNLOAD_RETRY_SLEEP) => {}
                    }
                }
            }
        }
        Err(PrepareAbort::Exhausted)
    }
}

enum PrepareAbort {
    Cancelled,
    Exhausted,
}
