use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

const GQL_URL: &str = "https://gql.twitch.tv/gql";
const GQL_CLIENT_ID: &str = "kd1unb4b3q4t58fwlpcbzcbnm76a8fp";
const ACCESS_TOKEN_QUERY_HASH: &str =
    "36b89d2507fce29e5ca551df756d27c1cfe079e2609642b4390aa4c35796eb11";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("download failed with status {status}")]
    Status { status: StatusCode },
    #[error("no access token for clip {slug}")]
    TokenMissing { slug: String },
    #[error("no video qualities available for clip {slug}")]
    NoQualities { slug: String },
    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Fetches one clip's media to a local file.
#[async_trait]
pub trait ClipFetcher: Send + Sync {
    async fn fetch(&self, slug: &str, dest: &Path) -> DownloadResult<()>;
}

#[derive(Debug, Deserialize)]
struct GqlResponse {
    data: GqlData,
}

#[derive(Debug, Deserialize)]
struct GqlData {
    clip: Option<ClipAccessToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClipAccessToken {
    playback_access_token: PlaybackAccessToken,
    video_qualities: Vec<VideoQuality>,
}

#[derive(Debug, Deserialize)]
struct PlaybackAccessToken {
    signature: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct VideoQuality {
    #[serde(rename = "sourceURL")]
    source_url: String,
}

/// Resolves a clip slug to a signed playback URL via the persisted GraphQL
/// query, then streams the highest-quality source to disk.
pub struct ClipDownloader {
    http: reqwest::Client,
}

impl ClipDownloader {
    pub fn new() -> DownloadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    async fn access_token(&self, slug: &str) -> DownloadResult<ClipAccessToken> {
        let query = json!({
            "operationName": "VideoAccessToken_Clip",
            "variables": { "slug": slug },
            "extensions": {
                "persistedQuery": {
                    "version": 1,
                    "sha256Hash": ACCESS_TOKEN_QUERY_HASH,
                }
            }
        });

        let response = self
            .http
            .post(GQL_URL)
            .header("Client-ID", GQL_CLIENT_ID)
            .json(&query)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status {
                status: response.status(),
            });
        }
        let body: GqlResponse = response.json().await?;
        body.data.clip.ok_or_else(|| DownloadError::TokenMissing {
            slug: slug.to_string(),
        })
    }

    /// The first listed quality is the source rendition.
    async fn signed_url(&self, slug: &str) -> DownloadResult<Url> {
        let token = self.access_token(slug).await?;
        let quality = token
            .video_qualities
            .first()
            .ok_or_else(|| DownloadError::NoQualities {
                slug: slug.to_string(),
            })?;
        let mut url = Url::parse(&quality.source_url)?;
        url.query_pairs_mut()
            .append_pair("sig", &token.playback_access_token.signature)
            .append_pair("token", &token.playback_access_token.value);
        Ok(url)
    }

    async fn download_to(&self, url: Url, dest: &Path) -> DownloadResult<()> {
        let response = self.http.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status {
                status: response.status(),
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| DownloadError::Io {
                source,
                path: dest.to_path_buf(),
            })?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| DownloadError::Io {
                    source,
                    path: dest.to_path_buf(),
                })?;
        }
        file.flush().await.map_err(|source| DownloadError::Io {
            source,
            path: dest.to_path_buf(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl ClipFetcher for ClipDownloader {
    async fn fetch(&self, slug: &str, dest: &Path) -> DownloadResult<()> {
        let url = self.signed_url(slug).await?;
        debug!(slug, dest = %dest.display(), "downloading clip");
        self.download_to(url, dest).await
    }
}
