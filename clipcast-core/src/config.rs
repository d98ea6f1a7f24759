use std::path::{Path, PathBuf};

use serde::Deserialize;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub sentry: SentrySection,
    pub twitch: TwitchSection,
    #[serde(default)]
    pub stream: StreamSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSection {
    #[serde(default)]
    pub telegram: TelegramSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramSection {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SentrySection {
    #[serde(default)]
    pub dsn: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub traces_sample_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchSection {
    #[serde(default)]
    pub broadcaster_ids: Vec<String>,
    #[serde(default)]
    pub game_id: String,
    /// Lower bound of the catalog sweep, in the `"January 2, 2006"` layout.
    #[serde(default)]
    pub min_date: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub rtmp_url: String,
}

/// Playout tunables. Every field has a serde default so the section can be
/// omitted entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Capacity of the ready-clip channel in front of the sink.
    pub preload_count: usize,
    pub preload_workers: usize,
    /// Fade in/out length in seconds applied by the per-clip encoder.
    pub fade_duration: f64,
    /// Gap inserted between clips on the output timeline. Must cover at
    /// least one frame period at the output frame rate.
    pub artificial_offset_secs: f64,
    /// Read buffer between the encoder stdout and the muxer stdin.
    pub copy_buffer_mb: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            preload_count: 5,
            preload_workers: 1,
            fade_duration: 0.5,
            artificial_offset_secs: 1.0,
            copy_buffer_mb: 10,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> ConfigResult<Self> {
        let mut config: Self = serde_yaml::from_str(contents)?;
        if config.sentry.traces_sample_rate == 0.0 {
            config.sentry.traces_sample_rate = 1.0;
        }
        if config.sentry.environment.is_empty() {
            config.sentry.environment = "production".to_string();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.twitch.broadcaster_ids.is_empty() {
            return Err(ConfigError::Invalid(
                "twitch.broadcaster_ids must not be empty".into(),
            ));
        }
        for (field, value) in [
            ("twitch.game_id", &self.twitch.game_id),
            ("twitch.min_date", &self.twitch.min_date),
            ("twitch.client_id", &self.twitch.client_id),
            ("twitch.client_secret", &self.twitch.client_secret),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{field} is required")));
            }
        }
        if self.stream.preload_count == 0 {
            return Err(ConfigError::Invalid(
                "stream.preload_count must be at least 1".into(),
            ));
        }
        if self.stream.artificial_offset_secs < 1.0 / 60.0 {
            return Err(ConfigError::Invalid(
                "stream.artificial_offset_secs must cover at least one frame".into(),
            ));
        }
        Ok(())
    }
}
