//! Core data model definitions shared across Backdrop crates.
#![allow(missing_docs)]

pub mod asset;
pub mod background;
pub mod cache;
pub mod crop;
pub mod handle;
pub mod settings;
pub mod units;

pub use asset::{AssetRecord, AssetStatus, AssetTier, HealthCheckCandidate};
pub use background::{
    BackgroundDescriptor, BackgroundUrls, ColorBackground, CropMeta,
    CurrentBackgroundRecord, ImageBackground, SourceKind, SystemState,
};
pub use cache::CacheIndexEntry;
pub use crop::{
    CoverPosition, CropResult, FocalPoint, FocalSource, aspect_bucket,
};
pub use handle::{BlobHandle, HandleScope};
pub use settings::{BackgroundSettings, Frequency, SettingsPatch};
pub use units::ByteSize;
