use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BackdropError, Result};

#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub bytes: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(bytes: Vec<u8>) -> Self {
        Self {
            ok: true,
            status: 200,
            headers: Vec::new(),
            bytes,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
}

/// Race a fetch against a timer and reject non-2xx responses.
///
/// Adapters get the timeout too, but the race here is what bounds the
/// caller regardless of how the adapter behaves.
pub async fn fetch_bounded(
    fetcher: &dyn Fetcher,
    url: &str,
    timeout: Duration,
) -> Result<FetchResponse> {
    let response = tokio::time::timeout(timeout, fetcher.fetch(url, timeout))
        .await
        .map_err(|_| BackdropError::timeout(format!("fetch {url}"), timeout))??;

    if !response.ok {
        return Err(BackdropError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    Ok(response)
}
