use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

/// The two storage scopes offered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    /// Device-local, generous quota.
    Local,
    /// Synchronized across devices, small per-item quota.
    Sync,
}

impl StorageArea {
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageArea::Local => "local",
            StorageArea::Sync => "sync",
        }
    }
}

/// Change notification emitted after every successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub area: StorageArea,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Async dictionary with change notifications.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>>;

    async fn set(&self, area: StorageArea, key: &str, value: Value) -> Result<()>;

    /// Shallow-merge `patch` into the object stored at `key` and return the
    /// merged value. Non-object values are replaced.
    async fn patch(&self, area: StorageArea, key: &str, patch: Value) -> Result<Value>;

    async fn remove(&self, area: StorageArea, key: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    area: StorageArea,
    key: &str,
) -> Result<Option<T>> {
    match store.get(area, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    area: StorageArea,
    key: &str,
    value: &T,
) -> Result<()> {
    store.set(area, key, serde_json::to_value(value)?).await
}

/// Shallow object merge shared by the adapters.
pub(crate) fn merge_shallow(current: Option<Value>, patch: Value) -> Value {
    match (current, patch) {
        (Some(Value::Object(mut base)), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::merge_shallow;
    use serde_json::json;

    #[test]
    fn merge_overwrites_top_level_keys_only() {
        let merged = merge_shallow(
            Some(json!({"a": 1, "b": {"x": 1}})),
            json!({"b": {"y": 2}, "c": 3}),
        );
        assert_eq!(merged, json!({"a": 1, "b": {"y": 2}, "c": 3}));
        assert_eq!(merge_shallow(Some(json!(5)), json!({"a": 1})), json!({"a": 1}));
    }
}
