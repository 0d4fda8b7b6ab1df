//! Background-asset pipeline for a new-tab page.
//!
//! Leaf first:
//! - [`handles`]: reference-counted in-memory blobs grouped by scope.
//! - [`cache_index`]: persisted metadata and eviction over a byte cache.
//! - [`assets`]: thumbnail/full store for user-curated backgrounds.
//! - [`crop`]: saliency focal point and cover position.
//! - [`transition`]: preview-then-full rendering onto a stage.
//! - [`controller`]: state machine and public lifecycle API.
//!
//! Platform collaborators are reached through [`ports`]; [`infra`] has the
//! adapters.

pub mod assets;
pub mod cache_index;
pub mod controller;
pub mod crop;
pub mod error;
pub mod handles;
pub mod infra;
pub mod log_once;
pub mod ports;
pub mod time;
pub mod transition;

pub use assets::{AssetStore, AssetStoreLimits, AssetStoreStats, MAX_EVICTION_BATCH};
pub use cache_index::{CacheIndex, CacheIndexLimits, CleanupReport};
pub use controller::{
    BackgroundController, ControllerEvent, ControllerOptions, LoadOptions, LoadOutcome,
};
pub use crop::{CropAnalyzer, CropOptions, cover_position_for};
pub use error::{BackdropError, Result};
pub use handles::{BlobLease, HandleManager, HandleManagerOptions};
pub use time::Clock;
pub use transition::{
    TransitionDeps, TransitionOptions, TransitionOutcome, TransitionPipeline, TransitionRequest,
};

pub use backdrop_model as model;
