//! Progressive preview-then-full rendering onto the [`Stage`].

mod layers;

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use backdrop_model::{
    BackgroundDescriptor, CoverPosition, CropResult, HandleScope, ImageBackground,
};

use crate::{
    assets::AssetStore,
    cache_index::CacheIndex,
    crop::CropAnalyzer,
    error::{BackdropError, Result},
    handles::{BlobLease, HandleManager},
    log_once,
    ports::{LayerContent, LayerId, RasterSurface, Stage},
};

use layers::{LayerRecord, LayerStack};

/// Scheme of URLs served from the asset store instead of the network.
pub const ASSET_URL_SCHEME: &str = "asset://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOptions {
    /// Fade-out duration of outgoing layers.
    pub fade: Duration,
    /// Extra wait past `fade` before an outgoing layer is removed without
    /// having seen its transition end.
    pub retire_margin: Duration,
    /// Budget for fetching and decoding the low-resolution preview.
    pub preview_timeout: Duration,
    /// Budget for the full-resolution stage unless the request overrides it.
    pub prepare_timeout: Duration,
}

impl Default for TransitionOptions {
    fn default() -> Self {
        Self {
            fade: Duration::from_millis(400),
            retire_margin: Duration::from_millis(250),
            preview_timeout: Duration::from_secs(3),
            prepare_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRequest {
    pub viewport_aspect: f64,
    /// Per-background override of [`TransitionOptions::prepare_timeout`].
    pub prepare_timeout: Option<Duration>,
}

impl TransitionRequest {
    pub fn new(viewport_aspect: f64) -> Self {
        Self {
            viewport_aspect,
            prepare_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Full-resolution layer is on top.
    Full,
    /// Full-resolution stage failed; the preview stays visible.
    PreviewOnly,
    /// Solid color layer.
    Color,
}

#[derive(Debug, Clone)]
pub struct TransitionReport {
    /// Input descriptor with the crop that was applied.
    pub descriptor: BackgroundDescriptor,
    pub outcome: TransitionOutcome,
    pub layer: LayerId,
}

/// Everything the pipeline renders with.
#[derive(Clone)]
pub struct TransitionDeps {
    pub handles: Arc<HandleManager>,
    pub cache: Arc<CacheIndex>,
    pub assets: Arc<AssetStore>,
    pub crop: Arc<CropAnalyzer>,
    pub raster: Arc<dyn RasterSurface>,
    pub stage: Arc<dyn Stage>,
}

pub struct TransitionPipeline {
    handles: Arc<HandleManager>,
    cache: Arc<CacheIndex>,
    assets: Arc<AssetStore>,
    crop: Arc<CropAnalyzer>,
    raster: Arc<dyn RasterSurface>,
    layers: LayerStack,
    options: TransitionOptions,
    runs: AtomicU64,
    scope_seq: AtomicU64,
}

impl fmt::Debug for TransitionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionPipeline")
            .field("options", &self.options)
            .field("runs", &self.runs.load(Ordering::Relaxed))
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl TransitionPipeline {
    pub fn new(deps: TransitionDeps, options: TransitionOptions) -> Arc<Self> {
        let layers = LayerStack::new(
            Arc::clone(&deps.stage),
            Arc::clone(&deps.handles),
            options.fade,
            options.retire_margin,
        );
        Arc::new(Self {
            handles: deps.handles,
            cache: deps.cache,
            assets: deps.assets,
            crop: deps.crop,
            raster: deps.raster,
            layers,
            options,
            runs: AtomicU64::new(0),
            scope_seq: AtomicU64::new(0),
        })
    }

    pub fn options(&self) -> &TransitionOptions {
        &self.options
    }

    pub fn handles(&self) -> &Arc<HandleManager> {
        &self.handles
    }

    pub fn cache(&self) -> &Arc<CacheIndex> {
        &self.cache
    }

    pub fn assets(&self) -> &Arc<AssetStore> {
        &self.assets
    }

    pub fn crop(&self) -> &Arc<CropAnalyzer> {
        &self.crop
    }

    /// Number of `run_transition` calls so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn visible_layers(&self) -> Vec<LayerId> {
        self.layers.visible_ids()
    }

    pub fn retiring_layers(&self) -> usize {
        self.layers.retiring_len()
    }

    /// Crop (when no reusable crop exists) and render `descriptor`.
    pub async fn run_transition(
        &self,
        mut descriptor: BackgroundDescriptor,
        request: TransitionRequest,
    ) -> Result<TransitionReport> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let prepare_timeout = request
            .prepare_timeout
            .unwrap_or(self.options.prepare_timeout);

        if let Some(image) = descriptor.image_mut() {
            self.ensure_crop(image, request.viewport_aspect).await;
        }

        tracing::debug!(
            run,
            id = descriptor.id(),
            source = %descriptor.source_kind(),
            timeout_ms = prepare_timeout.as_millis() as u64,
            "running transition"
        );

        let (outcome, layer) = match &descriptor {
            BackgroundDescriptor::Color(color) => {
                let layer = self.mount_color(&color.color).await?;
                (TransitionOutcome::Color, layer)
            }
            BackgroundDescriptor::Files(image) | BackgroundDescriptor::Remote(image) => {
                self.apply_image(image, run, prepare_timeout).await?
            }
        };

        Ok(TransitionReport {
            descriptor,
            outcome,
            layer,
        })
    }

    /// Warm the byte cache and crop memo for a descriptor that may be shown
    /// next. Returns the descriptor with its crop filled in.
    pub async fn prepare_ahead(
        &self,
        mut descriptor: BackgroundDescriptor,
        viewport_aspect: f64,
    ) -> Result<BackgroundDescriptor> {
        let Some(image) = descriptor.image_mut() else {
            return Ok(descriptor);
        };
        self.ensure_crop(image, viewport_aspect).await;

        let scope = self.next_scope("preload", 0);
        let mut urls = vec![image.urls.full.clone()];
        urls.extend(image.urls.distinct_small().map(str::to_string));
        let mut result = Ok(());
        for url in urls.iter().filter(|u| !u.starts_with(ASSET_URL_SCHEME)) {
            let timeout = self.options.prepare_timeout;
            let fetched = tokio::time::timeout(timeout, self.cache.get_cached_or_fetch(url, scope.clone()))
                .await
                .unwrap_or_else(|_| Err(BackdropError::timeout(format!("preload {url}"), timeout)));
            if let Err(err) = fetched {
                result = Err(err);
                break;
            }
        }
        self.handles.release_scope(&scope);
        result.map(|()| descriptor)
    }

    /// Unmount every layer and release what they hold.
    pub async fn shutdown(&self) -> usize {
        self.layers.clear().await
    }

    async fn ensure_crop(&self, image: &mut ImageBackground, viewport_aspect: f64) {
        if image.reusable_crop(viewport_aspect).is_some() {
            return;
        }
        let crop = if image.urls.full.starts_with(ASSET_URL_SCHEME) {
            CropResult::FALLBACK
        } else {
            self.crop
                .analyze_crop_for_background(&image.urls.full, viewport_aspect)
                .await
        };
        image.apply_crop(&crop, viewport_aspect);
    }

    async fn apply_image(
        &self,
        image: &ImageBackground,
        run: u64,
        prepare_timeout: Duration,
    ) -> Result<(TransitionOutcome, LayerId)> {
        let position = image.position.unwrap_or(CoverPosition::CENTER);

        let mut preview_layer = None;
        if let Some(small) = image.urls.distinct_small() {
            let timeout = self.options.preview_timeout.min(prepare_timeout);
            let scope = self.next_scope("preview", run);
            match self.mount_image(small, &scope, position, timeout).await {
                Ok(layer) => preview_layer = Some(layer),
                Err(err) => {
                    tracing::debug!(url = small, error = %err, "preview stage failed");
                }
            }
        }

        let full = &image.urls.full;
        let scope = self.next_scope("full", run);
        match self.mount_image(full, &scope, position, prepare_timeout).await {
            Ok(layer) => {
                log_once::forget("transition-soft", full);
                Ok((TransitionOutcome::Full, layer))
            }
            Err(err) => match preview_layer {
                Some(layer) => {
                    log_once::log_soft_failure_once(full, &err);
                    Ok((TransitionOutcome::PreviewOnly, layer))
                }
                None => Err(err),
            },
        }
    }

    async fn mount_color(&self, color: &str) -> Result<LayerId> {
        let id = self
            .layers
            .stage()
            .mount(LayerContent::Color(color.to_string()))
            .await?;
        self.layers.push(LayerRecord::new(id, None, None));
        Ok(id)
    }

    /// Load, decode and mount one image. On any failure the handles created
    /// under `scope` are released before returning.
    async fn mount_image(
        &self,
        url: &str,
        scope: &HandleScope,
        position: CoverPosition,
        timeout: Duration,
    ) -> Result<LayerId> {
        let prepared = bounded(timeout, format!("prepare {url}"), self.prepare(url, scope)).await;
        let lease = match prepared {
            Ok(lease) => lease,
            Err(err) => {
                self.handles.release_scope(scope);
                return Err(err);
            }
        };

        let content = LayerContent::Image {
            handle: lease.handle().clone(),
            position,
        };
        let id = match self.layers.stage().mount(content).await {
            Ok(id) => id,
            Err(err) => {
                drop(lease);
                self.handles.release_scope(scope);
                return Err(err);
            }
        };

        let handle = lease.into_handle();
        let scope = (!url.starts_with(ASSET_URL_SCHEME)).then(|| scope.clone());
        self.layers.push(LayerRecord::new(id, Some(handle), scope));
        tracing::debug!(url, layer = %id, "layer mounted");
        Ok(id)
    }

    /// Resolve `url` to a decoded blob owned by a lease, so a timeout that
    /// drops this future mid-way cannot strand a reference.
    async fn prepare(&self, url: &str, scope: &HandleScope) -> Result<BlobLease> {
        let handle = match url.strip_prefix(ASSET_URL_SCHEME) {
            Some(id) => self
                .assets
                .object_url(id)
                .await
                .ok_or_else(|| BackdropError::NotFound(format!("asset {id}")))?,
            None => self.cache.get_cached_or_fetch(url, scope.clone()).await?,
        };

        let lease = self.handles.lease(&handle);
        self.handles.release(&handle, false);
        let lease = lease.ok_or_else(|| BackdropError::NotFound(handle.to_string()))?;

        let bytes = lease
            .bytes()
            .ok_or_else(|| BackdropError::NotFound(lease.handle().to_string()))?;
        self.raster.decode(bytes).await?;
        Ok(lease)
    }

    fn next_scope(&self, stage: &str, run: u64) -> HandleScope {
        let seq = self.scope_seq.fetch_add(1, Ordering::Relaxed);
        HandleScope::new(format!("transition:{run}:{stage}:{seq}"))
    }
}

async fn bounded<T>(
    timeout: Duration,
    what: String,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| Err(BackdropError::timeout(what, timeout)))
}

#[cfg(test)]
mod tests;
