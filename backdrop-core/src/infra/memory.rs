//! In-process adapters for every storage and network port.
//!
//! They back the test suites and embedders that do not need durability.
//! Each one can be told to fail or to add latency so timer-driven behavior
//! can be exercised.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use backdrop_model::{AssetRecord, AssetTier};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    error::{BackdropError, Result},
    ports::{
        AssetDatabase, ByteCache, FetchResponse, Fetcher, KeyValueStore,
        StorageArea, StorageChange, kv::merge_shallow,
    },
};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

async fn simulate_latency(latency: &Mutex<Duration>) {
    let delay = *latency.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<(StorageArea, String), Value>>,
    changes: broadcast::Sender<StorageChange>,
    failing: AtomicBool,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackdropError::Storage("key/value store unavailable".into()));
        }
        Ok(())
    }

    fn write(&self, area: StorageArea, key: &str, new_value: Option<Value>) {
        let old_value = {
            let mut values = self.values.lock();
            let slot = (area, key.to_string());
            match &new_value {
                Some(v) => values.insert(slot, v.clone()),
                None => values.remove(&slot),
            }
        };
        if old_value != new_value {
            let _ = self.changes.send(StorageChange {
                area,
                key: key.to_string(),
                old_value,
                new_value,
            });
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.values.lock().get(&(area, key.to_string())).cloned())
    }

    async fn set(&self, area: StorageArea, key: &str, value: Value) -> Result<()> {
        self.check()?;
        self.write(area, key, Some(value));
        Ok(())
    }

    async fn patch(&self, area: StorageArea, key: &str, patch: Value) -> Result<Value> {
        self.check()?;
        let current = self.values.lock().get(&(area, key.to_string())).cloned();
        let merged = merge_shallow(current, patch);
        self.write(area, key, Some(merged.clone()));
        Ok(merged)
    }

    async fn remove(&self, area: StorageArea, key: &str) -> Result<()> {
        self.check()?;
        self.write(area, key, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[derive(Debug, Default)]
pub struct MemoryByteCache {
    objects: DashMap<String, Vec<u8>>,
    latency: Mutex<Duration>,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryByteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ByteCache for MemoryByteCache {
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        simulate_latency(&self.latency).await;
        Ok(self.objects.get(url).map(|v| v.clone()))
    }

    async fn put(&self, url: &str, bytes: &[u8]) -> Result<()> {
        simulate_latency(&self.latency).await;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BackdropError::Storage(format!("put refused for {url}")));
        }
        self.objects.insert(url.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        simulate_latency(&self.latency).await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BackdropError::Storage(format!("delete refused for {url}")));
        }
        Ok(self.objects.remove(url).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        simulate_latency(&self.latency).await;
        Ok(self.objects.iter().map(|e| e.key().clone()).collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAssetDatabase {
    records: DashMap<String, AssetRecord>,
    blobs: DashMap<(String, AssetTier), Vec<u8>>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryAssetDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a storage error.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of calls that reached the database.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn blob_len(&self, id: &str, tier: AssetTier) -> Option<usize> {
        self.blobs.get(&(id.to_string(), tier)).map(|b| b.len())
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackdropError::Storage("asset database unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetDatabase for MemoryAssetDatabase {
    async fn get(&self, id: &str) -> Result<Option<AssetRecord>> {
        self.enter()?;
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn put(&self, record: &AssetRecord) -> Result<()> {
        self.enter()?;
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.enter()?;
        self.records.remove(id);
        self.blobs.retain(|(owner, _), _| owner != id);
        Ok(())
    }

    async fn get_blob(&self, id: &str, tier: AssetTier) -> Result<Option<Vec<u8>>> {
        self.enter()?;
        Ok(self.blobs.get(&(id.to_string(), tier)).map(|b| b.clone()))
    }

    async fn put_blob(&self, id: &str, tier: AssetTier, bytes: &[u8]) -> Result<()> {
        self.enter()?;
        self.blobs.insert((id.to_string(), tier), bytes.to_vec());
        Ok(())
    }

    async fn delete_blob(&self, id: &str, tier: AssetTier) -> Result<()> {
        self.enter()?;
        self.blobs.remove(&(id.to_string(), tier));
        Ok(())
    }

    async fn list_by_last_access(&self) -> Result<Vec<AssetRecord>> {
        self.enter()?;
        let mut records: Vec<AssetRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn list_by_pinned(&self, pinned: bool) -> Result<Vec<AssetRecord>> {
        self.enter()?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.is_user_pinned == pinned)
            .map(|r| r.value().clone())
            .collect())
    }
}

/// Fetcher over a fixed URL table. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: DashMap<String, Vec<u8>>,
    calls: DashMap<String, usize>,
    latency: Mutex<Duration>,
    slow: DashMap<String, Duration>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.responses.insert(url.into(), bytes);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Delay responses for one URL only.
    pub fn set_url_latency(&self, url: impl Into<String>, latency: Duration) {
        self.slow.insert(url.into(), latency);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.get(url).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResponse> {
        *self.calls.entry(url.to_string()).or_default() += 1;
        simulate_latency(&self.latency).await;
        let per_url = self.slow.get(url).map(|d| *d);
        if let Some(delay) = per_url {
            tokio::time::sleep(delay).await;
        }

        Ok(match self.responses.get(url) {
            Some(bytes) => FetchResponse::ok(bytes.clone()),
            None => FetchResponse {
                ok: false,
                status: 404,
                ..FetchResponse::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryAssetDatabase, MemoryKeyValueStore};
    use crate::ports::{AssetDatabase, KeyValueStore, StorageArea};
    use serde_json::json;

    #[tokio::test]
    async fn kv_emits_changes_with_old_and_new_values() {
        let kv = MemoryKeyValueStore::new();
        let mut changes = kv.subscribe();

        kv.set(StorageArea::Sync, "settings", json!({"a": 1}))
            .await
            .unwrap();
        let merged = kv
            .patch(StorageArea::Sync, "settings", json!({"b": 2}))
            .await
            .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2}));

        let first = changes.recv().await.unwrap();
        assert_eq!(first.old_value, None);
        let second = changes.recv().await.unwrap();
        assert_eq!(second.old_value, Some(json!({"a": 1})));
        assert_eq!(second.new_value, Some(json!({"a": 1, "b": 2})));

        assert!(
            kv.get(StorageArea::Local, "settings")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let db = MemoryAssetDatabase::new();
        db.fail_next(2);
        assert!(db.get("x").await.is_err());
        assert!(db.get("x").await.is_err());
        assert!(db.get("x").await.unwrap().is_none());
        assert_eq!(db.calls(), 3);
    }
}
