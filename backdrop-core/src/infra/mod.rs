//! Adapters implementing the [`crate::ports`] traits.
//!
//! `memory` holds in-process doubles used by tests and by hosts that keep
//! nothing on disk; the rest talk to the filesystem, the network and the
//! `image` decoder.

pub mod cacache_store;
pub mod file_kv;
pub mod http;
pub mod memory;
pub mod raster;
pub mod stage;

pub use cacache_store::{CacacheAssetDatabase, CacacheByteCache};
pub use file_kv::{DEFAULT_SYNC_ITEM_QUOTA, JsonFileKeyValueStore};
pub use http::HttpFetcher;
pub use memory::{MemoryAssetDatabase, MemoryByteCache, MemoryKeyValueStore, StaticFetcher};
pub use raster::ImageRaster;
pub use stage::{HeadlessStage, StageEvent};
