use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffprobe failed (status {status:?}): {stderr}")]
    Failed {
        status: Option<i32>,
        stderr: String,
    },
    #[error("could not parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no duration found in ffprobe output")]
    MissingDuration,
    #[error("invalid duration in ffprobe output: {0:?}")]
    InvalidDuration(String),
}

pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Measures the precise duration of a media file.
#[async_trait]
pub trait DurationProber: Send + Sync {
    async fn probe(&self, path: &Path) -> ProbeResult<Duration>;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FfprobeProber;

#[async_trait]
impl DurationProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> ProbeResult<Duration> {
        let output = Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_duration(&output.stdout)
    }
}

fn parse_duration(stdout: &[u8]) -> ProbeResult<Duration> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)?;
    let raw = parsed.format.duration.ok_or(ProbeError::MissingDuration)?;
    let secs: f64 = raw
        .parse()
        .map_err(|_| ProbeError::InvalidDuration(raw.clone()))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ProbeError::InvalidDuration(raw));
    }
    Ok(Duration::from_secs_f64(secs))
}
