use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::Clip;
use crate::config::StreamSection;

use super::{MuxerInput, SinkError, SinkResult};

const FONT_FILE: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";

/// Turns one prepared clip into timestamp-shifted MPEG-TS bytes written to
/// the muxer input.
#[async_trait]
pub trait EncoderRunner: Send + Sync {
    async fn stream_clip(
        &self,
        clip: &Clip,
        source: &Path,
        offset: Duration,
        cancel: &CancellationToken,
        output: &mut MuxerInput,
    ) -> SinkResult<()>;
}

/// Escapes a string for use inside a single-quoted drawtext argument. The
/// quote escape must run first: its replacement introduces no colons, so the
/// colon escape can never corrupt it.
pub fn escape_drawtext(raw: &str) -> String {
    raw.replace('\'', "'\\''").replace(':', "\\:")
}

/// Filter chain applied to every clip: fade in/out, scale-to-fit 1920x1080,
/// letterbox, and the attribution overlay in the top-right corner. The
/// fade-out start is clamped at zero for clips shorter than the fade.
pub fn filter_chain(clip: &Clip, fade_duration: f64) -> String {
    let fade_out_start = (clip.duration - fade_duration).max(0.0);
    let overlay = escape_drawtext(&format!("{} - {}", clip.broadcaster_name, clip.title));
    format!(
        "fade=t=in:st=0:d={fade_duration:.2},\
         fade=t=out:st={fade_out_start:.2}:d={fade_duration:.2},\
         scale=1920:1080:flags=lanczos:force_original_aspect_ratio=decrease,\
         pad=1920:1080:(ow-iw)/2:(oh-ih)/2:color=black,\
         drawtext=text='{overlay}':fontfile={FONT_FILE}:x=w-text_w-20:y=20:\
         fontsize=28:fontcolor=white:shadowcolor=black:shadowx=2:shadowy=2"
    )
}

/// Arguments for the per-clip encoder process: H.264 CBR 6 Mbps at 1080p60
/// with a 120-frame GOP, AAC stereo, MPEG-TS on stdout with every timestamp
/// shifted by `offset` so the concatenated stream carries one continuous
/// timeline.
pub fn encoder_args(clip: &Clip, source: &Path, offset: Duration, fade_duration: f64) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-vf".into(),
        filter_chain(clip, fade_duration),
        "-c:v".into(),
        "libx264".into(),
        "-b:v".into(),
        "6000k".into(),
        "-minrate".into(),
        "6000k".into(),
        "-maxrate".into(),
        "6000k".into(),
        "-bufsize".into(),
        "12000k".into(),
        "-r".into(),
        "60".into(),
        "-g".into(),
        "120".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-x264-params".into(),
        "nal-hrd=cbr:force-cfr=1".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "160k".into(),
        "-ar".into(),
        "44100".into(),
        "-ac".into(),
        "2".into(),
        "-muxdelay".into(),
        "0".into(),
        "-muxpreload".into(),
        "0".into(),
        "-mpegts_flags".into(),
        "+initial_discontinuity".into(),
    ];
    args.push("-output_ts_offset".into());
    args.push(format!("{:.3}", offset.as_secs_f64()));
    args.push("-f".into());
    args.push("mpegts".into());
    args.push("pipe:1".into());
    args
}

pub struct FfmpegEncoder {
    fade_duration: f64,
    buffer_bytes: usize,
}

impl FfmpegEncoder {
    pub fn new(stream: &StreamSection) -> Self {
        Self {
            fade_duration: stream.fade_duration,
            buffer_bytes: stream.copy_buffer_mb.max(1) * 1024 * 1024,
        }
    }
}

#[async_trait]
impl EncoderRunner for FfmpegEncoder {
    async fn stream_clip(
        &self,
        clip: &Clip,
        source: &Path,
        offset: Duration,
        cancel: &CancellationToken,
        output: &mut MuxerInput,
    ) -> SinkResult<()> {
        let args = encoder_args(clip, source, offset, self.fade_duration);
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SinkError::Spawn {
                program: "ffmpeg",
                source,
            })?;

        let stdout = child.stdout.take().ok_or(SinkError::Pipe {
            program: "ffmpeg encoder",
        })?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        // The big buffer lets the muxer keep reading through short encoder
        // stalls without underrunning the RTMP session.
        let mut reader = BufReader::with_capacity(self.buffer_bytes, stdout);
        let copied = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(SinkError::Cancelled);
            }
            copied = tokio::io::copy_buf(&mut reader, output) => copied,
        };
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(source) => {
                let _ = child.kill().await;
                return Err(SinkError::Io(source));
            }
        };

        let status = child.wait().await.map_err(SinkError::Io)?;
        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            return Err(SinkError::Encoder {
                status: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        debug!(clip_id = %clip.id, bytes, "encoder finished");
        Ok(())
    }
}
