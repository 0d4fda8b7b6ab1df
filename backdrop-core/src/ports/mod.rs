//! Boundaries to the host platform.
//!
//! Every collaborator the pipeline does not own (storage areas, byte cache,
//! record database, network, image decode, render target, background
//! sources) is reached through one of these traits. Production adapters live
//! in [`crate::infra`].

pub mod asset_db;
pub mod byte_cache;
pub mod fetch;
pub mod kv;
pub mod raster;
pub mod source;
pub mod stage;

pub use asset_db::AssetDatabase;
pub use byte_cache::ByteCache;
pub use fetch::{FetchResponse, Fetcher, fetch_bounded};
pub use kv::{KeyValueStore, StorageArea, StorageChange, get_json, set_json};
pub use raster::{ImageDimensions, PixelBuffer, RasterSurface};
pub use source::BackgroundSource;
pub use stage::{LayerContent, LayerId, Stage};
