use async_trait::async_trait;

use crate::error::Result;

/// URL-keyed byte cache. The cache index is metadata layered on top of it.
#[async_trait]
pub trait ByteCache: Send + Sync {
    /// `match(url)`: the cached bytes, if present.
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, url: &str, bytes: &[u8]) -> Result<()>;

    /// Returns whether an object was removed.
    async fn delete(&self, url: &str) -> Result<bool>;

    /// Every URL currently held. Used for orphan pruning.
    async fn keys(&self) -> Result<Vec<String>>;
}
