use std::{fmt, time::Duration};

use async_trait::async_trait;
use backdrop_model::{BlobHandle, CoverPosition};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerContent {
    Image {
        handle: BlobHandle,
        position: CoverPosition,
    },
    Color(String),
}

/// Render target that stacks background layers.
///
/// Newly mounted layers go on top. Outgoing layers are faded and then
/// unmounted by the transition pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn mount(&self, content: LayerContent) -> Result<LayerId>;

    async fn fade_out(&self, layer: LayerId, duration: Duration);

    /// Resolves when the layer's fade transition has ended. May never resolve.
    async fn transition_end(&self, layer: LayerId);

    async fn unmount(&self, layer: LayerId);
}
