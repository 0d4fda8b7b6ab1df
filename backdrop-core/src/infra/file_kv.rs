use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast};

use crate::{
    error::{BackdropError, Result},
    ports::{KeyValueStore, StorageArea, StorageChange, kv::merge_shallow},
};

/// Per-item quota of the synchronized area, in bytes of `key + json(value)`.
pub const DEFAULT_SYNC_ITEM_QUOTA: usize = 8 * 1024;

/// Key/value store persisted as one JSON document per storage area.
///
/// Every mutation rewrites the area file through a temporary file and a
/// rename, so readers never observe a half-written document.
#[derive(Debug)]
pub struct JsonFileKeyValueStore {
    dir: PathBuf,
    areas: Mutex<HashMap<StorageArea, Map<String, Value>>>,
    changes: broadcast::Sender<StorageChange>,
    sync_item_quota: usize,
}

impl JsonFileKeyValueStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_quota(dir, DEFAULT_SYNC_ITEM_QUOTA).await
    }

    pub async fn open_with_quota(dir: impl Into<PathBuf>, sync_item_quota: usize) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut areas = HashMap::new();
        for area in [StorageArea::Local, StorageArea::Sync] {
            areas.insert(area, load_area(&area_path(&dir, area)).await);
        }

        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            dir,
            areas: Mutex::new(areas),
            changes,
            sync_item_quota,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check_quota(&self, area: StorageArea, key: &str, value: &Value) -> Result<()> {
        if area != StorageArea::Sync || self.sync_item_quota == 0 {
            return Ok(());
        }
        let size = key.len() + serde_json::to_vec(value)?.len();
        if size > self.sync_item_quota {
            return Err(BackdropError::Storage(format!(
                "sync item {key} is {size} bytes; quota is {}",
                self.sync_item_quota
            )));
        }
        Ok(())
    }

    async fn mutate(
        &self,
        area: StorageArea,
        key: &str,
        update: impl FnOnce(Option<Value>) -> Result<Option<Value>>,
    ) -> Result<Option<Value>> {
        let mut areas = self.areas.lock().await;
        let map = areas.entry(area).or_default();

        let old_value = map.get(key).cloned();
        let new_value = update(old_value.clone())?;
        if let Some(value) = &new_value {
            self.check_quota(area, key, value)?;
        }

        let mut next = map.clone();
        match &new_value {
            Some(value) => {
                next.insert(key.to_string(), value.clone());
            }
            None => {
                next.remove(key);
            }
        }
        write_area(&area_path(&self.dir, area), &next).await?;
        *map = next;

        if old_value != new_value {
            let _ = self.changes.send(StorageChange {
                area,
                key: key.to_string(),
                old_value,
                new_value: new_value.clone(),
            });
        }
        Ok(new_value)
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKeyValueStore {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>> {
        Ok(self
            .areas
            .lock()
            .await
            .get(&area)
            .and_then(|map| map.get(key).cloned()))
    }

    async fn set(&self, area: StorageArea, key: &str, value: Value) -> Result<()> {
        self.mutate(area, key, |_| Ok(Some(value))).await?;
        Ok(())
    }

    async fn patch(&self, area: StorageArea, key: &str, patch: Value) -> Result<Value> {
        let merged = self
            .mutate(area, key, |current| Ok(Some(merge_shallow(current, patch))))
            .await?;
        merged.ok_or_else(|| BackdropError::Internal("patch produced no value".into()))
    }

    async fn remove(&self, area: StorageArea, key: &str) -> Result<()> {
        self.mutate(area, key, |_| Ok(None)).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

fn area_path(dir: &Path, area: StorageArea) -> PathBuf {
    dir.join(format!("{}.json", area.as_str()))
}

async fn load_area(path: &Path) -> Map<String, Value> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read storage area");
            return Map::new();
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "storage area is not a JSON object; starting empty");
            Map::new()
        }
    }
}

async fn write_area(path: &Path, map: &Map<String, Value>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(map)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
