use async_trait::async_trait;
use backdrop_model::{BackgroundDescriptor, BackgroundSettings, SourceKind};

use crate::error::Result;

/// Supplier of background candidates (local file manager, remote provider).
#[async_trait]
pub trait BackgroundSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn next(
        &self,
        settings: &BackgroundSettings,
    ) -> Result<BackgroundDescriptor>;
}
