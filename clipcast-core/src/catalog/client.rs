use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::{CatalogError, CatalogResult};

const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
const OAUTH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Tokens are refreshed once they get within this margin of expiry.
const TOKEN_REFRESH_MARGIN_MINUTES: i64 = 10;

/// One catalog entry as returned by the clips endpoint. Only the fields the
/// pipeline consumes are deserialized.
#[derive(Debug, Clone, Deserialize)]
pub struct Clip {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub broadcaster_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_id: String,
    /// Duration declared by the catalog, in seconds. Treated as approximate;
    /// the timeline advances on the probed duration instead.
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GetClipsParams {
    pub broadcaster_id: String,
    pub game_id: Option<String>,
    pub first: usize,
    pub after: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClipsPage {
    #[serde(default)]
    pub data: Vec<Clip>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

impl ClipsPage {
    /// Cursor for the next page, or `None` when the chain is exhausted. The
    /// API signals the end either by omitting the cursor or by sending an
    /// empty string.
    pub fn next_cursor(&self) -> Option<&str> {
        self.pagination.cursor.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AuthToken {
    bearer: String,
    expires_at: DateTime<Utc>,
}

impl AuthToken {
    fn is_fresh(&self) -> bool {
        self.expires_at - Utc::now() > Duration::minutes(TOKEN_REFRESH_MARGIN_MINUTES)
    }
}

/// Read access to the remote clip catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_clips(&self, params: &GetClipsParams) -> CatalogResult<ClipsPage>;
}

/// Twitch Helix client with client-credentials authentication. The bearer
/// token is cached and re-fetched shortly before it expires.
pub struct HelixClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth: RwLock<Option<AuthToken>>,
}

impl HelixClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> CatalogResult<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth: RwLock::new(None),
        })
    }

    async fn bearer_token(&self) -> CatalogResult<String> {
        {
            let guard = self.auth.read().await;
            if let Some(token) = guard.as_ref() {
                if token.is_fresh() {
                    return Ok(token.bearer.clone());
                }
            }
        }

        let mut guard = self.auth.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(token) = guard.as_ref() {
            if token.is_fresh() {
                return Ok(token.bearer.clone());
            }
        }
        let token = self.fetch_token().await?;
        let bearer = token.bearer.clone();
        *guard = Some(token);
        Ok(bearer)
    }

    async fn fetch_token(&self) -> CatalogResult<AuthToken> {
        let response = self
            .http
            .post(OAUTH_TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Auth { status, body });
        }
        let auth: AuthResponse = response.json().await?;
        debug!(expires_in = auth.expires_in, "catalog token refreshed");
        Ok(AuthToken {
            bearer: auth.access_token,
            expires_at: Utc::now() + Duration::seconds(auth.expires_in),
        })
    }
}

#[async_trait]
impl CatalogClient for HelixClient {
    async fn get_clips(&self, params: &GetClipsParams) -> CatalogResult<ClipsPage> {
        let bearer = self.bearer_token().await?;

        let mut query: Vec<(&str, String)> = Vec::new();
        if !params.broadcaster_id.is_empty() {
            query.push(("broadcaster_id", params.broadcaster_id.clone()));
        }
        if let Some(game_id) = &params.game_id {
            query.push(("game_id", game_id.clone()));
        }
        if params.first > 0 {
            query.push(("first", params.first.to_string()));
        }
        if let Some(after) = &params.after {
            query.push(("after", after.clone()));
        }
        if let Some(started_at) = params.started_at {
            query.push((
                "started_at",
                started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(ended_at) = params.ended_at {
            query.push((
                "ended_at",
                ended_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }

        let response = self
            .http
            .get(format!("{HELIX_BASE_URL}/clips"))
            .query(&query)
            .bearer_auth(bearer)
            .header("Client-Id", &self.client_id)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Api { status, body });
        }
        Ok(response.json().await?)
    }
}
