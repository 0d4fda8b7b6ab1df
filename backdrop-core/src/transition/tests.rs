use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use backdrop_model::{
    BackgroundDescriptor, BackgroundUrls, CoverPosition, CropResult, FocalPoint, ImageBackground,
};

use super::{
    TransitionDeps, TransitionOptions, TransitionOutcome, TransitionPipeline, TransitionRequest,
};
use crate::{
    assets::{AssetStore, AssetStoreLimits},
    cache_index::{CacheIndex, CacheIndexLimits},
    crop::{CropAnalyzer, CropOptions},
    error::{BackdropError, Result},
    handles::{HandleManager, HandleManagerOptions},
    infra::{
        HeadlessStage, MemoryAssetDatabase, MemoryByteCache, MemoryKeyValueStore, StaticFetcher,
    },
    ports::{ImageDimensions, LayerContent, PixelBuffer, RasterSurface},
    time::Clock,
};

const WIDESCREEN: f64 = 16.0 / 9.0;

/// Decodes anything except payloads starting with `bad`; samples anything
/// except URLs containing `unreadable`.
#[derive(Default)]
struct FakeRaster {
    samples: AtomicUsize,
}

#[async_trait]
impl RasterSurface for FakeRaster {
    async fn decode(&self, bytes: Arc<[u8]>) -> Result<ImageDimensions> {
        if bytes.starts_with(b"bad") {
            return Err(BackdropError::Decode("corrupt payload".into()));
        }
        Ok(ImageDimensions {
            width: 4000,
            height: 2000,
        })
    }

    async fn sample(&self, url: &str, _max_edge: u32) -> Result<(ImageDimensions, PixelBuffer)> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        if url.contains("unreadable") {
            return Err(BackdropError::ReadbackDenied(url.to_string()));
        }
        // Dark canvas with a bright block on the right.
        let rgba = (0..8 * 4)
            .flat_map(|i| if i % 8 >= 6 { [230, 190, 40, 255] } else { [15, 15, 15, 255] })
            .collect();
        let buffer = PixelBuffer::new(8, 4, rgba)
            .ok_or_else(|| BackdropError::Decode("size".into()))?;
        Ok((
            ImageDimensions {
                width: 4000,
                height: 2000,
            },
            buffer,
        ))
    }
}

struct Fixture {
    pipeline: Arc<TransitionPipeline>,
    fetcher: Arc<StaticFetcher>,
    stage: Arc<HeadlessStage>,
    handles: Arc<HandleManager>,
    assets: Arc<AssetStore>,
    raster: Arc<FakeRaster>,
}

async fn fixture(auto_transition_end: bool) -> Fixture {
    let clock = Clock::system();
    let kv = Arc::new(MemoryKeyValueStore::new());
    let fetcher = Arc::new(StaticFetcher::new());
    let stage = Arc::new(HeadlessStage::new(auto_transition_end));
    let raster = Arc::new(FakeRaster::default());
    let handles = HandleManager::new(HandleManagerOptions::default());

    let cache = CacheIndex::open(
        Arc::new(MemoryByteCache::new()),
        kv.clone(),
        fetcher.clone(),
        handles.clone(),
        CacheIndexLimits::default(),
        clock.clone(),
    )
    .await;
    let assets = AssetStore::new(
        Arc::new(MemoryAssetDatabase::new()),
        kv,
        handles.clone(),
        AssetStoreLimits::default(),
        clock,
    );
    let crop = Arc::new(CropAnalyzer::new(raster.clone(), CropOptions::default()));

    let pipeline = TransitionPipeline::new(
        TransitionDeps {
            handles: handles.clone(),
            cache,
            assets: assets.clone(),
            crop,
            raster: raster.clone(),
            stage: stage.clone(),
        },
        TransitionOptions {
            fade: Duration::from_millis(10),
            retire_margin: Duration::from_millis(10),
            preview_timeout: Duration::from_secs(2),
            prepare_timeout: Duration::from_secs(5),
        },
    );

    Fixture {
        pipeline,
        fetcher,
        stage,
        handles,
        assets,
        raster,
    }
}

fn remote(id: &str, full: &str, small: Option<&str>) -> BackgroundDescriptor {
    let mut urls = BackgroundUrls::new(full);
    if let Some(small) = small {
        urls = urls.with_small(small);
    }
    BackgroundDescriptor::Remote(ImageBackground::new(id, urls))
}

fn analyzed() -> CropResult {
    CropResult {
        focal_point: FocalPoint::smartcrop(0.8, 0.5),
        position: CoverPosition::new(80.0, 50.0),
        width: 4000,
        height: 2000,
    }
}

async fn settle(pipeline: &TransitionPipeline) {
    for _ in 0..400 {
        if pipeline.retiring_layers() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("outgoing layers were never retired");
}

#[tokio::test]
async fn preview_is_replaced_by_full_resolution() {
    let fx = fixture(true).await;
    fx.fetcher.insert("https://img/a-small.jpg", b"small".to_vec());
    fx.fetcher.insert("https://img/a.jpg", b"full".to_vec());

    let report = fx
        .pipeline
        .run_transition(
            remote("a", "https://img/a.jpg", Some("https://img/a-small.jpg")),
            TransitionRequest::new(WIDESCREEN),
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, TransitionOutcome::Full);
    assert_eq!(fx.stage.mount_count(), 2);

    settle(&fx.pipeline).await;
    assert_eq!(fx.pipeline.visible_layers(), vec![report.layer]);
    assert_eq!(fx.stage.layers().len(), 1);
    assert_eq!(fx.handles.len(), 1);
    match fx.stage.top() {
        Some(LayerContent::Image { handle, .. }) => {
            assert_eq!(fx.handles.bytes(&handle).as_deref(), Some(&b"full"[..]));
        }
        other => panic!("unexpected top layer: {other:?}"),
    }
}

#[tokio::test]
async fn full_failure_keeps_the_preview() {
    let fx = fixture(true).await;
    fx.fetcher.insert("https://img/b-small.jpg", b"small".to_vec());
    fx.fetcher.insert("https://img/b.jpg", b"bad bytes".to_vec());

    let report = fx
        .pipeline
        .run_transition(
            remote("b", "https://img/b.jpg", Some("https://img/b-small.jpg")),
            TransitionRequest::new(WIDESCREEN),
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, TransitionOutcome::PreviewOnly);
    assert_eq!(fx.stage.mount_count(), 1);
    assert_eq!(fx.handles.len(), 1);
}

#[tokio::test]
async fn failure_before_any_layer_is_a_hard_error() {
    let fx = fixture(true).await;
    let err = fx
        .pipeline
        .run_transition(
            remote("c", "https://img/missing.jpg", None),
            TransitionRequest::new(WIDESCREEN),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackdropError::HttpStatus { status: 404, .. }));
    assert!(fx.stage.layers().is_empty());
    assert!(fx.handles.is_empty());
}

#[tokio::test]
async fn crop_runs_only_without_a_reusable_one() {
    let fx = fixture(true).await;
    fx.fetcher.insert("https://img/d.jpg", b"full".to_vec());

    let mut descriptor = remote("d", "https://img/d.jpg", None);
    if let Some(image) = descriptor.image_mut() {
        image.apply_crop(&analyzed(), WIDESCREEN);
    }
    let report = fx
        .pipeline
        .run_transition(descriptor, TransitionRequest::new(WIDESCREEN))
        .await
        .unwrap();
    assert_eq!(fx.raster.samples.load(Ordering::SeqCst), 0);

    let report = fx
        .pipeline
        .run_transition(report.descriptor, TransitionRequest::new(4.0 / 3.0))
        .await
        .unwrap();
    assert_eq!(fx.raster.samples.load(Ordering::SeqCst), 1);
    let meta = report
        .descriptor
        .image()
        .and_then(|img| img.crop_meta.clone())
        .unwrap();
    assert!(meta.matches("https://img/d.jpg", 4.0 / 3.0));
}

#[tokio::test]
async fn unreadable_image_is_centered_and_analyzed_again_next_time() {
    let fx = fixture(true).await;
    fx.fetcher.insert("https://img/unreadable.jpg", b"full".to_vec());

    let report = fx
        .pipeline
        .run_transition(
            remote("u", "https://img/unreadable.jpg", None),
            TransitionRequest::new(WIDESCREEN),
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, TransitionOutcome::Full);
    let image = report.descriptor.image().unwrap();
    assert_eq!(image.position, Some(CoverPosition::CENTER));
    assert!(image.crop_meta.is_none());
    assert_eq!(fx.raster.samples.load(Ordering::SeqCst), 1);

    fx.pipeline
        .run_transition(report.descriptor, TransitionRequest::new(WIDESCREEN))
        .await
        .unwrap();
    assert_eq!(fx.raster.samples.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn asset_urls_come_from_the_asset_store() {
    let fx = fixture(true).await;
    assert!(
        fx.assets
            .save_thumbnail("fav", b"thumb", "unsplash", "https://img/fav.jpg")
            .await
    );

    let report = fx
        .pipeline
        .run_transition(
            remote("fav", "asset://fav", None),
            TransitionRequest::new(WIDESCREEN),
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, TransitionOutcome::Full);
    assert_eq!(fx.handles.len(), 1);
    assert_eq!(fx.raster.samples.load(Ordering::SeqCst), 0);

    fx.pipeline
        .run_transition(
            BackgroundDescriptor::color("c", "#000000"),
            TransitionRequest::new(WIDESCREEN),
        )
        .await
        .unwrap();
    settle(&fx.pipeline).await;
    assert!(fx.handles.is_empty());
    assert_eq!(fx.assets.get_thumbnail("fav").await.as_deref(), Some(&b"thumb"[..]));
}

#[tokio::test(start_paused = true)]
async fn outgoing_layers_retire_without_transition_end() {
    let fx = fixture(false).await;
    let request = TransitionRequest::new(WIDESCREEN);

    let first = fx
        .pipeline
        .run_transition(BackgroundDescriptor::color("one", "#111111"), request)
        .await
        .unwrap();
    let second = fx
        .pipeline
        .run_transition(BackgroundDescriptor::color("two", "#222222"), request)
        .await
        .unwrap();
    assert_eq!(first.outcome, TransitionOutcome::Color);
    assert_eq!(fx.stage.layers().len(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(fx.pipeline.retiring_layers(), 0);
    let remaining: Vec<_> = fx.stage.layers().into_iter().map(|(id, _)| id).collect();
    assert_eq!(remaining, vec![second.layer]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_unmounts_everything_and_frees_handles() {
    let fx = fixture(false).await;
    fx.fetcher.insert("https://img/e-small.jpg", b"small".to_vec());
    fx.fetcher.insert("https://img/e.jpg", b"full".to_vec());

    let mut descriptor = remote("e", "https://img/e.jpg", Some("https://img/e-small.jpg"));
    if let Some(image) = descriptor.image_mut() {
        image.apply_crop(&analyzed(), WIDESCREEN);
    }
    fx.pipeline
        .run_transition(descriptor, TransitionRequest::new(WIDESCREEN))
        .await
        .unwrap();
    assert_eq!(fx.handles.len(), 2);

    assert_eq!(fx.pipeline.shutdown().await, 2);
    assert!(fx.stage.layers().is_empty());
    assert!(fx.handles.is_empty());
    assert_eq!(fx.pipeline.shutdown().await, 0);
}
