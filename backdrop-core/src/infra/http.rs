use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::{
    error::{BackdropError, Result},
    ports::{FetchResponse, Fetcher},
};

const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("backdrop/", env!("CARGO_PKG_VERSION"));

/// `Fetcher` over `reqwest`, with `file://` URLs served from disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_CLIENT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BackdropError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_file(url: &Url) -> Result<FetchResponse> {
        let path = url
            .to_file_path()
            .map_err(|()| BackdropError::Network(format!("not a local file URL: {url}")))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(FetchResponse::ok(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FetchResponse {
                ok: false,
                status: 404,
                ..FetchResponse::default()
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        let parsed =
            Url::parse(url).map_err(|e| BackdropError::Network(format!("invalid URL {url}: {e}")))?;

        match parsed.scheme() {
            "file" => return Self::fetch_file(&parsed).await,
            "http" | "https" => {}
            other => {
                return Err(BackdropError::Network(format!(
                    "unsupported scheme {other} for {url}"
                )));
            }
        }

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackdropError::timeout(format!("fetch {url}"), timeout)
                } else {
                    BackdropError::Network(format!("request to {url} failed: {e}"))
                }
            })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackdropError::Network(format!("reading body of {url} failed: {e}")))?;

        tracing::debug!(url, status = status.as_u16(), bytes = bytes.len(), "fetched");

        Ok(FetchResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            headers,
            bytes: bytes.to_vec(),
        })
    }
}
