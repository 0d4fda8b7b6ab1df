//! Saliency-based smart crop.
//!
//! Results are memoized per `(url, aspect bucket)` for the lifetime of the
//! analyzer. Analysis never fails from the caller's point of view: decode
//! errors, refused readback and timeouts all yield [`CropResult::FALLBACK`].

mod cover;
mod saliency;

pub use cover::cover_position_for;
pub use saliency::focal_point;

use std::{fmt, sync::Arc, time::Duration};

use backdrop_model::{CropResult, aspect_bucket};
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::{
    error::{BackdropError, Result},
    log_once,
    ports::RasterSurface,
};

/// Largest edge the saliency pass ever looks at.
pub const MAX_ANALYSIS_EDGE: u32 = 96;

#[derive(Debug, Clone)]
pub struct CropOptions {
    /// Clamped to `1..=MAX_ANALYSIS_EDGE`.
    pub max_edge: u32,
    pub timeout: Duration,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            max_edge: MAX_ANALYSIS_EDGE,
            timeout: Duration::from_secs(3),
        }
    }
}

type MemoKey = (String, u32);

pub struct CropAnalyzer {
    raster: Arc<dyn RasterSurface>,
    options: CropOptions,
    // `None` marks a failed analysis; those entries are dropped so the next
    // caller retries.
    memo: DashMap<MemoKey, Arc<OnceCell<Option<CropResult>>>>,
}

impl fmt::Debug for CropAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CropAnalyzer")
            .field("options", &self.options)
            .field("memoized", &self.memo.len())
            .finish_non_exhaustive()
    }
}

impl CropAnalyzer {
    pub fn new(raster: Arc<dyn RasterSurface>, mut options: CropOptions) -> Self {
        options.max_edge = options.max_edge.clamp(1, MAX_ANALYSIS_EDGE);
        Self {
            raster,
            options,
            memo: DashMap::new(),
        }
    }

    pub fn options(&self) -> &CropOptions {
        &self.options
    }

    /// Focal point and cover position of `url` for a viewport of
    /// `viewport_aspect` (width / height).
    ///
    /// Concurrent callers for the same key share one analysis.
    pub async fn analyze_crop_for_background(
        &self,
        url: &str,
        viewport_aspect: f64,
    ) -> CropResult {
        let bucket = aspect_bucket(viewport_aspect);
        if url.is_empty() || bucket == 0 {
            return CropResult::FALLBACK;
        }

        let key: MemoKey = (url.to_string(), bucket);
        let cell = {
            let entry = self.memo.entry(key.clone()).or_default();
            Arc::clone(entry.value())
        };

        let outcome = *cell
            .get_or_init(|| self.compute(url, viewport_aspect, bucket))
            .await;

        match outcome {
            Some(result) => result,
            None => {
                self.memo.remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
                CropResult::FALLBACK
            }
        }
    }

    /// Memoized result, if an analysis for this key already succeeded.
    pub fn cached(&self, url: &str, viewport_aspect: f64) -> Option<CropResult> {
        let key = (url.to_string(), aspect_bucket(viewport_aspect));
        self.memo.get(&key).and_then(|cell| cell.get().copied().flatten())
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    pub fn clear(&self) {
        self.memo.clear();
    }

    async fn compute(&self, url: &str, viewport_aspect: f64, bucket: u32) -> Option<CropResult> {
        let timeout = self.options.timeout;
        let outcome = tokio::time::timeout(timeout, self.analyze(url, viewport_aspect))
            .await
            .unwrap_or_else(|_| Err(BackdropError::timeout(format!("crop analysis {url}"), timeout)));

        match outcome {
            Ok(result) => {
                tracing::debug!(
                    url,
                    bucket,
                    x = %result.position.x_css(),
                    y = %result.position.y_css(),
                    "smart crop computed"
                );
                log_once::forget("crop-fallback", &format!("{url}@{bucket}"));
                Some(result)
            }
            Err(err) => {
                log_once::log_crop_fallback_once(url, bucket, &err);
                None
            }
        }
    }

    async fn analyze(&self, url: &str, viewport_aspect: f64) -> Result<CropResult> {
        let (dimensions, buffer) = self.raster.sample(url, self.options.max_edge).await?;
        let focal = tokio::task::spawn_blocking(move || focal_point(&buffer)).await?;
        Ok(CropResult {
            focal_point: focal,
            position: cover_position_for(
                dimensions.width,
                dimensions.height,
                viewport_aspect,
                focal,
            ),
            width: dimensions.width,
            height: dimensions.height,
        })
    }
}
