use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram rejected message: status {status}, body: {body}")]
    Api { status: u16, body: String },
}

pub type AlertResult<T> = std::result::Result<T, AlertError>;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Pushes operator-facing notices to a Telegram chat. This is the only error
/// telemetry channel the daemon drives directly; everything else goes through
/// `tracing`.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Returns `None` when the config carries no token or chat id, so callers
    /// can wire alerting through an `Option` without special cases.
    pub fn from_config(config: &Config) -> Option<Self> {
        let telegram = &config.log.telegram;
        if telegram.token.is_empty() || telegram.chat_id.is_empty() {
            return None;
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Some(Self {
            http,
            token: telegram.token.clone(),
            chat_id: telegram.chat_id.clone(),
        })
    }

    pub async fn notify(&self, text: &str) -> AlertResult<()> {
        let url = format!("{API_BASE}/bot{}/sendMessage", self.token);
        let response = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Api { status, body });
        }
        Ok(())
    }
}
