use async_trait::async_trait;
use backdrop_model::{AssetRecord, AssetTier};

use crate::error::Result;

/// Durable record database backing the asset store.
///
/// Blobs are stored beside their record and addressed by `(id, tier)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetDatabase: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<AssetRecord>>;

    async fn put(&self, record: &AssetRecord) -> Result<()>;

    /// Remove the record and every blob belonging to it.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn get_blob(&self, id: &str, tier: AssetTier) -> Result<Option<Vec<u8>>>;

    async fn put_blob(&self, id: &str, tier: AssetTier, bytes: &[u8]) -> Result<()>;

    async fn delete_blob(&self, id: &str, tier: AssetTier) -> Result<()>;

    /// All records ordered by `last_accessed_at` ascending.
    async fn list_by_last_access(&self) -> Result<Vec<AssetRecord>>;

    /// Records whose pin flag equals `pinned`.
    async fn list_by_pinned(&self, pinned: bool) -> Result<Vec<AssetRecord>>;
}
