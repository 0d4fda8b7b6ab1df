#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use backdrop_core::{
    AssetStore, AssetStoreLimits, BackgroundController, CacheIndex, CacheIndexLimits, Clock,
    ControllerOptions, CropAnalyzer, CropOptions, HandleManager, HandleManagerOptions, Result,
    TransitionDeps, TransitionOptions, TransitionPipeline,
    infra::{HeadlessStage, ImageRaster, MemoryAssetDatabase, MemoryByteCache, MemoryKeyValueStore, StaticFetcher},
    ports::BackgroundSource,
};
use backdrop_model::{
    BackgroundDescriptor, BackgroundSettings, BackgroundUrls, ImageBackground, SourceKind,
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

pub const HOST: &str = "https://img.test";

/// PNG with a bright block in the right-hand fifth of a dark canvas.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        if x >= width - width / 5 {
            Rgba([240, 200, 40, 255])
        } else {
            Rgba([12, 12, 12, 255])
        }
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("encode png");
    out
}

pub fn url_for(id: &str) -> String {
    format!("{HOST}/{id}.png")
}

/// Remote source handing out `<prefix>-0`, `<prefix>-1`, ...
pub struct SequenceSource {
    kind: SourceKind,
    prefix: String,
    served: AtomicUsize,
}

impl SequenceSource {
    pub fn new(kind: SourceKind, prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            prefix: prefix.to_string(),
            served: AtomicUsize::new(0),
        })
    }

    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    pub fn id(&self, n: usize) -> String {
        format!("{}-{n}", self.prefix)
    }
}

#[async_trait]
impl BackgroundSource for SequenceSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn next(&self, _settings: &BackgroundSettings) -> Result<BackgroundDescriptor> {
        let n = self.served.fetch_add(1, Ordering::SeqCst);
        let id = self.id(n);
        let image = ImageBackground::new(id.clone(), BackgroundUrls::new(url_for(&id)));
        Ok(match self.kind {
            SourceKind::Files => BackgroundDescriptor::Files(image),
            _ => BackgroundDescriptor::Remote(image),
        })
    }
}

pub struct Harness {
    pub controller: Arc<BackgroundController>,
    pub pipeline: Arc<TransitionPipeline>,
    pub stage: Arc<HeadlessStage>,
    pub fetcher: Arc<StaticFetcher>,
    pub handles: Arc<HandleManager>,
}

pub async fn harness(
    kv: Arc<MemoryKeyValueStore>,
    fetcher: Arc<StaticFetcher>,
    sources: Vec<Arc<dyn BackgroundSource>>,
    options: ControllerOptions,
) -> Harness {
    let clock = Clock::system();
    let stage = Arc::new(HeadlessStage::new(true));
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
    let raster =
        Arc::new(ImageRaster::new(fetcher.clone(), Duration::from_secs(5)).with_cache(cache.clone()));
    let assets = AssetStore::new(
        Arc::new(MemoryAssetDatabase::new()),
        kv.clone(),
        handles.clone(),
        AssetStoreLimits::default(),
        clock.clone(),
    );
    let crop = Arc::new(CropAnalyzer::new(raster.clone(), CropOptions::default()));

    let pipeline = TransitionPipeline::new(
        TransitionDeps {
            handles: handles.clone(),
            cache,
            assets,
            crop,
            raster,
            stage: stage.clone(),
        },
        TransitionOptions {
            fade: Duration::from_millis(10),
            retire_margin: Duration::from_millis(10),
            ..TransitionOptions::default()
        },
    );
    let controller =
        BackgroundController::open(pipeline.clone(), kv, sources, options, clock).await;

    Harness {
        controller,
        pipeline,
        stage,
        fetcher,
        handles,
    }
}

/// Fetcher serving `count` wide images for `source`.
pub fn fetcher_for(source: &SequenceSource, count: usize, width: u32, height: u32) -> Arc<StaticFetcher> {
    let fetcher = Arc::new(StaticFetcher::new());
    for n in 0..count {
        fetcher.insert(url_for(&source.id(n)), png(width, height));
    }
    fetcher
}

pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
