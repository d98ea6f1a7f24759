mod client;
mod pool;
mod rate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clip::{ClipFetcher, ClipHandle, DurationProber};
use crate::config::Config;

pub use client::{CatalogClient, Clip, ClipsPage, GetClipsParams, HelixClient, Pagination};
pub use pool::CatalogPool;
pub use rate::RateGate;

const PAGE_SIZE: usize = 100;
const RATE_LIMIT_INTERVAL: StdDuration = StdDuration::from_secs(3);
const FETCH_RETRY_SLEEP: StdDuration = StdDuration::from_secs(1);

/// Width of one backward-walking catalog window. The remote caps any
/// time-bounded cursor chain at 1000 results; five months stays under that
/// cap for typical channels, so nothing is silently truncated.
const WINDOW_DAYS: i64 = 150;

const MIN_DATE_FORMAT: &str = "%B %d, %Y";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog request failed: status {status}, body: {body}")]
    Api { status: u16, body: String },
    #[error("catalog authentication failed: status {status}, body: {body}")]
    Auth { status: u16, body: String },
    #[error("could not parse min date {raw:?}: {source}")]
    MinDate {
        raw: String,
        source: chrono::ParseError,
    },
    #[error("cancelled")]
    Cancelled,
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Parses the configured sweep lower bound, written in the
/// `"January 2, 2006"` layout, as midnight UTC of that day.
pub fn parse_min_date(raw: &str) -> CatalogResult<DateTime<Utc>> {
    let date =
        NaiveDate::parse_from_str(raw.trim(), MIN_DATE_FORMAT).map_err(|source| {
            CatalogError::MinDate {
                raw: raw.to_string(),
                source,
            }
        })?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub broadcaster_ids: Vec<String>,
    pub game_id: String,
    pub min_date: String,
    pub data_dir: PathBuf,
}

impl CatalogSettings {
    pub fn from_config(config: &Config, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            broadcaster_ids: config.twitch.broadcaster_ids.clone(),
            game_id: config.twitch.game_id.clone(),
            min_date: config.twitch.min_date.clone(),
            data_dir: data_dir.into(),
        }
    }
}

/// Discovers clips for the configured game across every source channel and
/// stages them in the [`CatalogPool`]. Discovery is best-effort: request
/// failures are logged and retried in place, never fatal, because a partial
/// catalog still feeds the stream.
#[derive(Clone)]
pub struct CatalogService {
    settings: Arc<CatalogSettings>,
    client: Arc<dyn CatalogClient>,
    fetcher: Arc<dyn ClipFetcher>,
    prober: Arc<dyn DurationProber>,
    pool: Arc<CatalogPool>,
    gate: Arc<RateGate>,
}

impl CatalogService {
    /// Must be called from within a runtime (the rate gate spawns its
    /// replenish ticker).
    pub fn new(
        settings: CatalogSettings,
        client: Arc<dyn CatalogClient>,
        fetcher: Arc<dyn ClipFetcher>,
        prober: Arc<dyn DurationProber>,
        pool: Arc<CatalogPool>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            client,
            fetcher,
            prober,
            pool,
            gate: Arc::new(RateGate::new(RATE_LIMIT_INTERVAL)),
        }
    }

    /// Kicks off the background sweep and blocks until the first clip lands
    /// in the pool (or the sweep finishes empty). Fetching continues in the
    /// background for the rest of the run.
    pub async fn init(&self, cancel: &CancellationToken) -> CatalogResult<()> {
        let min_date = parse_min_date(&self.settings.min_date)?;
        let mut ready = self.pool.subscribe_initial_ready();

        let service = self.clone();
        let sweep_cancel = cancel.clone();
        tokio::spawn(async move { service.sweep(min_date, sweep_cancel).await });

        tokio::select! {
            _ = cancel.cancelled() => Err(CatalogError::Cancelled),
            changed = ready.wait_for(|ready| *ready) => {
                changed.map_err(|_| CatalogError::Cancelled)?;
                debug!("initial catalog ready, fetch continues in the background");
                Ok(())
            }
        }
    }

    async fn sweep(&self, min_date: DateTime<Utc>, cancel: CancellationToken) {
        // Shuffle so a restart does not re-hammer the same channel first.
        let mut channels = self.settings.broadcaster_ids.clone();
        channels.shuffle(&mut rand::thread_rng());

        let mut workers = Vec::with_capacity(channels.len());
        for channel in channels {
            let service = self.clone();
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                service.fetch_channel(&channel, min_date, &cancel).await;
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }

        self.pool.mark_initial_ready();
        info!(
            clips = self.pool.len(),
            declared_secs = self.pool.declared_duration_total(),
            "catalog sweep finished"
        );
    }

    /// Walks fixed windows backward from now until the window end crosses
    /// the configured minimum date.
    async fn fetch_channel(
        &self,
        channel: &str,
        min_date: DateTime<Utc>,
        cancel: &CancellationToken,
    ) {
        let window = Duration::days(WINDOW_DAYS);
        let mut ended_at = Utc::now();
        loop {
            let started_at = ended_at - window;
            if !self.fetch_window(channel, started_at, ended_at, cancel).await {
                return;
            }
            ended_at = started_at;
            if ended_at < min_date {
                break;
            }
        }
        debug!(channel, "channel walk reached min date");
    }

    /// Paginates one time window. Returns `false` when cancelled.
    async fn fetch_window(
        &self,
        channel: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> bool {
        let mut after: Option<String> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = self.gate.acquire() => {}
            }

            debug!(
                channel,
                started_at = %started_at,
                ended_at = %ended_at,
                cursor = after.as_deref().unwrap_or(""),
                "requesting catalog page"
            );
            let params = GetClipsParams {
                broadcaster_id: channel.to_string(),
                game_id: None,
                first: PAGE_SIZE,
                after: after.clone(),
                started_at: Some(started_at),
                ended_at: Some(ended_at),
            };
            let page = match self.client.get_clips(&params).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(
                        channel,
                        error = %err,
                        "catalog request failed, retrying with the same cursor"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(FETCH_RETRY_SLEEP) => {}
                    }
                    continue;
                }
            };

            if page.data.is_empty() {
                return true;
            }

            let mut inserted = 0usize;
            for clip in &page.data {
                if clip.game_id != self.settings.game_id {
                    continue;
                }
                let handle = ClipHandle::new(
                    clip.clone(),
                    &self.settings.data_dir,
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.prober),
                );
                if self.pool.insert(handle) {
                    inserted += 1;
                }
            }
            if inserted > 0 {
                debug!(channel, inserted, "staged catalog clips");
            }

            match page.next_cursor() {
                Some(cursor) => after = Some(cursor.to_string()),
                None => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_date_layout_parses() {
        let parsed = parse_min_date("January 2, 2006").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2006-01-02T00:00:00+00:00");
        // zero-padded days are accepted too
        assert!(parse_min_date("March 07, 2021").is_ok());
    }

    #[test]
    fn malformed_min_date_is_rejected() {
        let err = parse_min_date("2006-01-02").unwrap_err();
        assert!(matches!(err, CatalogError::MinDate { .. }));
    }
}
