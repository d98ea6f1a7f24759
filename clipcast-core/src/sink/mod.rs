mod encoder;
mod muxer;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StreamSection;
use crate::preload::PreloadPool;

pub use encoder::{encoder_args, escape_drawtext, filter_chain, EncoderRunner, FfmpegEncoder};
pub use muxer::{muxer_args, Muxer};

/// Write half of the muxer process; boxed so tests can splice into an
/// in-memory pipe instead.
pub type MuxerInput = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no clips available")]
    NoClips,
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        source: std::io::Error,
    },
    #[error("{program} did not expose its stdio pipes")]
    Pipe { program: &'static str },
    #[error("encoder failed (status {status:?}): {stderr}")]
    Encoder {
        status: Option<i32>,
        stderr: String,
    },
    #[error("error splicing encoder output: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Position on the output timeline where the next clip's first frame lands.
/// Strictly non-decreasing: every streamed clip advances it by the measured
/// duration plus a fixed gap, so presentation timestamps can never overlap
/// at a splice point.
#[derive(Debug)]
pub struct PresentationOffset {
    position: Duration,
    gap: Duration,
}

impl PresentationOffset {
    pub fn new(gap: Duration) -> Self {
        Self {
            position: Duration::ZERO,
            gap,
        }
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn advance(&mut self, measured: Duration) -> Duration {
        self.position += measured + self.gap;
        self.position
    }
}

/// Owns the persistent RTMP muxer and feeds it re-encoded clips back to
/// back. A clip that failed preparation is skipped without touching the
/// timeline; an encoder failure mid-clip is fatal because the half-written
/// stream would corrupt the RTMP session.
pub struct StreamingSink {
    rtmp_url: String,
    artificial_offset: Duration,
    preload: PreloadPool,
    encoder: Arc<dyn EncoderRunner>,
}

impl StreamingSink {
    pub fn new(
        rtmp_url: impl Into<String>,
        stream: &StreamSection,
        preload: PreloadPool,
        encoder: Option<Arc<dyn EncoderRunner>>,
    ) -> Self {
        let encoder = encoder.unwrap_or_else(|| Arc::new(FfmpegEncoder::new(stream)));
        Self {
            rtmp_url: rtmp_url.into(),
            artificial_offset: Duration::from_secs_f64(stream.artificial_offset_secs),
            preload,
            encoder,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> SinkResult<()> {
        info!(rtmp_url = %self.rtmp_url, "starting the stream");
        let (muxer, input) = Muxer::spawn(&self.rtmp_url, cancel)?;
        let result = self.stream_to(cancel, input).await;
        // input is gone by now; the muxer sees EOF and winds down
        muxer.wait().await;
        result
    }

    /// The sink loop proper, decoupled from the muxer process so tests can
    /// drive it against an in-memory writer.
    pub async fn stream_to(
        &self,
        cancel: &CancellationToken,
        mut input: MuxerInput,
    ) -> SinkResult<()> {
        let mut ready = self.preload.start(cancel);
        let mut offset = PresentationOffset::new(self.artificial_offset);
        let mut streamed = 0usize;

        loop {
            let handle = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stream cancelled");
                    break;
                }
                next = ready.recv() => match next {
                    Some(handle) => handle,
                    None => {
                        if streamed == 0 {
                            return Err(SinkError::NoClips);
                        }
                        info!(streamed, "catalog exhausted, ending stream");
                        break;
                    }
                }
            };

            let (path, downloaded) = handle.downloaded_file();
            if !downloaded {
                warn!(clip_id = %handle.clip().id, "skipping clip that failed preparation");
                handle.release().await;
                continue;
            }

            info!(
                clip_id = %handle.clip().id,
                title = %handle.clip().title,
                offset_secs = offset.position().as_secs_f64(),
                "streaming clip"
            );
            let outcome = self
                .encoder
                .stream_clip(handle.clip(), &path, offset.position(), cancel, &mut input)
                .await;
            handle.release().await;
            match outcome {
                Ok(()) => {
                    let measured = handle.measured_duration().unwrap_or_default();
                    offset.advance(measured);
                    streamed += 1;
                }
                Err(SinkError::Cancelled) => {
                    info!("stream cancelled mid-clip");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_accumulates_measured_plus_gap() {
        let mut offset = PresentationOffset::new(Duration::from_secs(1));
        assert_eq!(offset.position(), Duration::ZERO);
        assert_eq!(offset.advance(Duration::from_secs(10)), Duration::from_secs(11));
        assert_eq!(offset.advance(Duration::from_secs(10)), Duration::from_secs(22));
        assert_eq!(offset.position(), Duration::from_secs(22));
    }

    #[test]
    fn offset_never_decreases() {
        let mut offset = PresentationOffset::new(Duration::from_millis(16));
        let mut previous = offset.position();
        for _ in 0..100 {
            let next = offset.advance(Duration::ZERO);
            assert!(next > previous);
            previous = next;
        }
    }
}
