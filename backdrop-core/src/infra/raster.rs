use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use image::GenericImageView;
use url::Url;

use backdrop_model::HandleScope;

use crate::{
    cache_index::CacheIndex,
    error::{BackdropError, Result},
    ports::{Fetcher, ImageDimensions, PixelBuffer, RasterSurface, fetch_bounded},
};

/// `RasterSurface` built on the `image` crate.
///
/// Remote sources go through the [`CacheIndex`] when one is attached, else
/// straight through the configured [`Fetcher`]; bare paths are read from
/// disk. When a readback allowlist is set, pixels are only read back
/// for hosts on it, and every other host fails with
/// [`BackdropError::ReadbackDenied`].
pub struct ImageRaster {
    fetcher: Arc<dyn Fetcher>,
    fetch_timeout: Duration,
    readback_hosts: Option<HashSet<String>>,
    cache: Option<Arc<CacheIndex>>,
}

impl std::fmt::Debug for ImageRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRaster")
            .field("fetch_timeout", &self.fetch_timeout)
            .field("readback_hosts", &self.readback_hosts)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl ImageRaster {
    pub fn new(fetcher: Arc<dyn Fetcher>, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            fetch_timeout,
            readback_hosts: None,
            cache: None,
        }
    }

    /// Load remote sources through `cache`, so the bytes sampled for a crop
    /// are the ones the render stage reuses.
    pub fn with_cache(mut self, cache: Arc<CacheIndex>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// An empty list allows every host.
    pub fn with_readback_hosts(mut self, hosts: impl IntoIterator<Item = String>) -> Self {
        let hosts: HashSet<String> = hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect();
        self.readback_hosts = (!hosts.is_empty()).then_some(hosts);
        self
    }

    fn check_readback(&self, url: &str) -> Result<()> {
        let Some(allowed) = &self.readback_hosts else {
            return Ok(());
        };
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        match host {
            // Local files and other host-less sources are always readable.
            None => Ok(()),
            Some(host) if allowed.contains(&host) => Ok(()),
            Some(_) => Err(BackdropError::ReadbackDenied(url.to_string())),
        }
    }

    async fn load(&self, url: &str) -> Result<Arc<[u8]>> {
        match Url::parse(url) {
            Ok(parsed) if parsed.scheme() != "file" => match &self.cache {
                Some(cache) => load_cached(cache, url).await,
                None => Ok(fetch_bounded(self.fetcher.as_ref(), url, self.fetch_timeout)
                    .await?
                    .bytes
                    .into()),
            },
            Ok(parsed) => {
                let path = parsed
                    .to_file_path()
                    .map_err(|()| BackdropError::NotFound(url.to_string()))?;
                Ok(tokio::fs::read(path).await?.into())
            }
            Err(_) => Ok(tokio::fs::read(Path::new(url)).await?.into()),
        }
    }
}

async fn load_cached(cache: &Arc<CacheIndex>, url: &str) -> Result<Arc<[u8]>> {
    let handle = cache
        .get_cached_or_fetch(url, HandleScope::new(format!("crop-sample:{url}")))
        .await?;
    let handles = cache.handles();
    let lease = handles.lease(&handle);
    handles.release(&handle, false);
    lease
        .and_then(|lease| lease.bytes())
        .ok_or_else(|| BackdropError::NotFound(handle.to_string()))
}

fn decode_dimensions(bytes: &[u8]) -> Result<ImageDimensions> {
    let img = image::load_from_memory(bytes).map_err(|e| BackdropError::Decode(e.to_string()))?;
    let (width, height) = img.dimensions();
    Ok(ImageDimensions { width, height })
}

fn downsample(bytes: &[u8], max_edge: u32) -> Result<(ImageDimensions, PixelBuffer)> {
    let img = image::load_from_memory(bytes).map_err(|e| BackdropError::Decode(e.to_string()))?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(BackdropError::Decode("image has no pixels".into()));
    }

    let max_edge = max_edge.max(1);
    let sampled = if width.max(height) > max_edge {
        img.thumbnail(max_edge, max_edge)
    } else {
        img
    };
    let rgba = sampled.to_rgba8();
    let (sw, sh) = rgba.dimensions();
    let buffer = PixelBuffer::new(sw, sh, rgba.into_raw())
        .ok_or_else(|| BackdropError::Decode("pixel buffer size mismatch".into()))?;

    Ok((ImageDimensions { width, height }, buffer))
}

#[async_trait]
impl RasterSurface for ImageRaster {
    async fn decode(&self, bytes: Arc<[u8]>) -> Result<ImageDimensions> {
        tokio::task::spawn_blocking(move || decode_dimensions(&bytes)).await?
    }

    async fn sample(&self, url: &str, max_edge: u32) -> Result<(ImageDimensions, PixelBuffer)> {
        self.check_readback(url)?;
        let bytes = self.load(url).await?;
        tokio::task::spawn_blocking(move || downsample(&bytes, max_edge)).await?
    }
}
