//! `cacache`-backed byte cache and asset database.
//!
//! Both live in a directory that `cacache` manages (index + content-addressed
//! blobs). Keys are versioned so the layout can change without colliding
//! with older entries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use backdrop_model::{AssetRecord, AssetTier};

use crate::{
    error::{BackdropError, Result},
    ports::{AssetDatabase, ByteCache},
};

const BYTES_PREFIX: &str = "bytes/v1/";
const ASSET_META_PREFIX: &str = "assets/v1/meta/";
const ASSET_BLOB_PREFIX: &str = "assets/v1/blob/";

fn map_cacache_err(op: &str, key: &str, err: cacache::Error) -> BackdropError {
    match err {
        cacache::Error::EntryNotFound(_, _) => {
            BackdropError::NotFound(format!("cache entry not found: {key}"))
        }
        cacache::Error::IntegrityError(err) => BackdropError::Storage(format!(
            "cache entry failed integrity check: {key} ({err})"
        )),
        cacache::Error::SizeMismatch(wanted, actual) => BackdropError::Storage(format!(
            "cache entry size mismatch: key={key}, wanted={wanted}, actual={actual}"
        )),
        other => BackdropError::Storage(format!("cacache {op} failed for {key}: {other}")),
    }
}

async fn read_optional(root: &Path, key: &str) -> Result<Option<Vec<u8>>> {
    match cacache::read(root, key).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
        Err(err) => Err(map_cacache_err("read", key, err)),
    }
}

async fn write(root: &Path, key: &str, bytes: &[u8]) -> Result<()> {
    cacache::write(root, key, bytes)
        .await
        .map(|_integrity| ())
        .map_err(|e| map_cacache_err("write", key, e))
}

/// Returns whether an entry existed.
async fn remove(root: &Path, key: &str) -> Result<bool> {
    let existed = cacache::metadata(root, key)
        .await
        .map_err(|e| map_cacache_err("metadata", key, e))?
        .is_some();
    if !existed {
        return Ok(false);
    }
    cacache::index::RemoveOpts::new()
        .remove_fully(true)
        .remove(root, key)
        .await
        .map_err(|e| map_cacache_err("remove", key, e))?;
    Ok(true)
}

/// Keys under `prefix`, with the prefix stripped.
async fn list_keys(root: &Path, prefix: &'static str) -> Result<Vec<String>> {
    let root = root.to_path_buf();
    let keys = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        for entry in cacache::index::ls(&root) {
            match entry {
                Ok(meta) => {
                    if let Some(rest) = meta.key.strip_prefix(prefix) {
                        out.push(rest.to_string());
                    }
                }
                Err(err) => tracing::warn!(error = %err, "cacache index ls entry error"),
            }
        }
        out
    })
    .await?;
    Ok(keys)
}

#[derive(Debug, Clone)]
pub struct CacacheByteCache {
    root: PathBuf,
}

impl CacacheByteCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key(url: &str) -> String {
        format!("{BYTES_PREFIX}{url}")
    }
}

#[async_trait]
impl ByteCache for CacacheByteCache {
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.root, &Self::key(url)).await
    }

    async fn put(&self, url: &str, bytes: &[u8]) -> Result<()> {
        write(&self.root, &Self::key(url), bytes).await
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        remove(&self.root, &Self::key(url)).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        list_keys(&self.root, BYTES_PREFIX).await
    }
}

/// Asset database storing record metadata as JSON next to its blobs.
#[derive(Debug, Clone)]
pub struct CacacheAssetDatabase {
    root: PathBuf,
}

impl CacacheAssetDatabase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn meta_key(id: &str) -> String {
        format!("{ASSET_META_PREFIX}{id}")
    }

    fn blob_key(id: &str, tier: AssetTier) -> String {
        format!("{ASSET_BLOB_PREFIX}{id}/{tier}")
    }

    async fn all_records(&self) -> Result<Vec<AssetRecord>> {
        let ids = list_keys(&self.root, ASSET_META_PREFIX).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(id, error = %err, "skipping unreadable asset record");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AssetDatabase for CacacheAssetDatabase {
    async fn get(&self, id: &str) -> Result<Option<AssetRecord>> {
        match read_optional(&self.root, &Self::meta_key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &AssetRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        write(&self.root, &Self::meta_key(&record.id), &bytes).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        for tier in [AssetTier::Thumbnail, AssetTier::Full] {
            remove(&self.root, &Self::blob_key(id, tier)).await?;
        }
        remove(&self.root, &Self::meta_key(id)).await?;
        Ok(())
    }

    async fn get_blob(&self, id: &str, tier: AssetTier) -> Result<Option<Vec<u8>>> {
        read_optional(&self.root, &Self::blob_key(id, tier)).await
    }

    async fn put_blob(&self, id: &str, tier: AssetTier, bytes: &[u8]) -> Result<()> {
        write(&self.root, &Self::blob_key(id, tier), bytes).await
    }

    async fn delete_blob(&self, id: &str, tier: AssetTier) -> Result<()> {
        remove(&self.root, &Self::blob_key(id, tier)).await?;
        Ok(())
    }

    async fn list_by_last_access(&self) -> Result<Vec<AssetRecord>> {
        let mut records = self.all_records().await?;
        records.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn list_by_pinned(&self, pinned: bool) -> Result<Vec<AssetRecord>> {
        let mut records = self.all_records().await?;
        records.retain(|r| r.is_user_pinned == pinned);
        Ok(records)
    }
}
