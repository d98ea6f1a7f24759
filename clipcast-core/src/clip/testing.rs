//! Test doubles for the preparation seams, shared between unit and
//! integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::downloader::{ClipFetcher, DownloadError, DownloadResult};
use super::probe::{DurationProber, ProbeError, ProbeResult};

/// Fetcher that writes a tiny placeholder payload, failing the first
/// `fail_first` attempts with an HTTP-status error.
pub struct StubFetcher {
    fail_first: usize,
    status: StatusCode,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn succeeding() -> Arc<Self> {
        Self::failing_first(0, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn failing(status: StatusCode) -> Arc<Self> {
        Self::failing_first(usize::MAX, status)
    }

    pub fn failing_first(fail_first: usize, status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            status,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipFetcher for StubFetcher {
    async fn fetch(&self, _slug: &str, dest: &Path) -> DownloadResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(DownloadError::Status {
                status: self.status,
            });
        }
        if let Some(parent) = dest.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        tokio::fs::write(dest, b"stub mp4 payload")
            .await
            .map_err(|source| DownloadError::Io {
                source,
                path: dest.to_path_buf(),
            })
    }
}

/// Fetcher whose requests never complete; useful for cancellation tests.
pub struct PendingFetcher;

#[async_trait]
impl ClipFetcher for PendingFetcher {
    async fn fetch(&self, _slug: &str, _dest: &Path) -> DownloadResult<()> {
        futures::future::pending().await
    }
}

/// Prober that reports a fixed duration without looking at the file.
pub struct FixedProber {
    secs: f64,
}

#[async_trait]
impl DurationProber for FixedProber {
    async fn probe(&self, _path: &Path) -> ProbeResult<Duration> {
        Ok(Duration::from_secs_f64(self.secs))
    }
}

/// Prober that always fails, as a corrupt download would.
pub struct FailingProber;

#[async_trait]
impl DurationProber for FailingProber {
    async fn probe(&self, _path: &Path) -> ProbeResult<Duration> {
        Err(ProbeError::MissingDuration)
    }
}

pub fn failing_fetcher() -> Arc<dyn ClipFetcher> {
    StubFetcher::failing(StatusCode::NOT_FOUND)
}

pub fn fixed_prober(secs: f64) -> Arc<dyn DurationProber> {
    Arc::new(FixedProber { secs })
}
