use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{MuxerInput, SinkError, SinkResult};

/// Arguments for the persistent RTMP push: stream-copy MPEG-TS from stdin to
/// FLV, pacing on input timestamps. `no_duration_filesize` keeps the FLV
/// muxer from trying to patch a header that never ends.
pub fn muxer_args(rtmp_url: &str) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-re".into(),
        "-fflags".into(),
        "+genpts".into(),
        "-i".into(),
        "pipe:0".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-copyts".into(),
        "-max_delay".into(),
        "1000000".into(),
        "-f".into(),
        "flv".into(),
        "-flvflags".into(),
        "no_duration_filesize".into(),
        rtmp_url.into(),
    ]
}

/// The long-lived RTMP muxer process. When it exits for any reason the RTMP
/// session is gone, so the reaper cancels the whole run.
pub struct Muxer {
    reaper: JoinHandle<()>,
}

impl Muxer {
    pub fn spawn(rtmp_url: &str, cancel: &CancellationToken) -> SinkResult<(Self, MuxerInput)> {
        let mut child = Command::new("ffmpeg")
            .args(muxer_args(rtmp_url))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SinkError::Spawn {
                program: "ffmpeg",
                source,
            })?;

        let stdin = child.stdin.take().ok_or(SinkError::Pipe {
            program: "ffmpeg muxer",
        })?;
        let stderr = child.stderr.take();

        let cancel = cancel.clone();
        let reaper = tokio::spawn(async move {
            let mut diagnostics = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut diagnostics).await;
            }
            let status = child.wait().await;
            if cancel.is_cancelled() {
                info!("rtmp muxer stopped");
            } else {
                error!(
                    status = ?status.as_ref().ok().and_then(|s| s.code()),
                    stderr = %diagnostics.trim(),
                    "rtmp muxer exited, ending the run"
                );
            }
            cancel.cancel();
        });

        Ok((Self { reaper }, Box::new(stdin)))
    }

    /// Waits for the muxer process to finish. Callers close the input side
    /// first so the process sees EOF and flushes the RTMP session.
    pub async fn wait(self) {
        let _ = self.reaper.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muxer_stream_copies_to_flv() {
        let args = muxer_args("rtmp://live.example.com/app/key");
        assert_eq!(args.last().map(String::as_str), Some("rtmp://live.example.com/app/key"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "pipe:0"));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "copy"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "flv"));
        assert!(args.contains(&"-re".to_string()));
        assert!(args.contains(&"-copyts".to_string()));
    }
}
