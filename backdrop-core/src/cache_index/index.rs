use std::collections::HashMap;

use backdrop_model::CacheIndexEntry;
use serde_json::{Map, Value};

use crate::time::duration_ms;

/// Storage key of the persisted index in the device-local area.
pub const INDEX_STORAGE_KEY: &str = "backdrop.cacheIndex.v1";

/// In-memory copy of the persisted index.
///
/// Mutations only set the dirty flag; the owner decides when a snapshot is
/// written back.
#[derive(Debug, Default)]
pub(super) struct IndexState {
    entries: HashMap<String, CacheIndexEntry>,
    malformed: Vec<String>,
    dirty: bool,
    last_flushed_ms: u64,
}

impl IndexState {
    /// Rebuild from the persisted JSON object. Entries that fail to parse are
    /// kept aside as malformed and pruned by the next cleanup.
    pub fn from_persisted(value: Option<Value>, now_ms: u64) -> Self {
        let mut state = Self {
            last_flushed_ms: now_ms,
            ..Self::default()
        };

        match value {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (url, raw) in map {
                    match serde_json::from_value::<CacheIndexEntry>(raw) {
                        Ok(entry) => {
                            state.entries.insert(url, entry);
                        }
                        Err(err) => {
                            tracing::debug!(url, error = %err, "malformed cache index entry");
                            state.malformed.push(url);
                        }
                    }
                }
            }
            Some(other) => {
                tracing::warn!(
                    kind = json_kind(&other),
                    "persisted cache index is not an object; starting empty"
                );
                state.dirty = true;
            }
        }
        state
    }

    /// Upsert `url`. With `keep_created_at` an existing entry keeps its
    /// creation time (and thus its TTL clock).
    pub fn touch(
        &mut self,
        url: &str,
        size: u64,
        keep_created_at: bool,
        now_ms: u64,
    ) -> bool {
        self.malformed.retain(|m| m != url);
        self.dirty = true;
        match self.entries.get_mut(url) {
            Some(entry) => {
                entry.size = size;
                entry.last_access = now_ms;
                if !keep_created_at {
                    entry.created_at = now_ms;
                }
                false
            }
            None => {
                self.entries
                    .insert(url.to_string(), CacheIndexEntry::new(size, now_ms));
                true
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<CacheIndexEntry> {
        self.entries.get(url).copied()
    }

    pub fn remove(&mut self, url: &str) -> bool {
        let removed = self.entries.remove(url).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Remove `url` only if nobody touched it since `seen` was captured.
    pub fn remove_if_unchanged(&mut self, url: &str, seen: &CacheIndexEntry) -> bool {
        if self.entries.get(url) == Some(seen) {
            self.entries.remove(url);
            self.dirty = true;
            return true;
        }
        false
    }

    pub fn take_malformed(&mut self) -> Vec<String> {
        let taken = std::mem::take(&mut self.malformed);
        if !taken.is_empty() {
            self.dirty = true;
        }
        taken
    }

    pub fn snapshot(&self) -> Vec<(String, CacheIndexEntry)> {
        self.entries
            .iter()
            .map(|(url, entry)| (url.clone(), *entry))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries
            .values()
            .fold(0u64, |acc, e| acc.saturating_add(e.size))
    }

    pub fn should_flush(&self, now_ms: u64, flush_interval: std::time::Duration) -> bool {
        if !self.dirty {
            return false;
        }
        now_ms.saturating_sub(self.last_flushed_ms) >= duration_ms(flush_interval).max(1)
    }

    pub fn prepare_flush(&mut self, now_ms: u64) -> Option<Value> {
        if !self.dirty {
            return None;
        }
        let mut map = Map::with_capacity(self.entries.len());
        for (url, entry) in &self.entries {
            match serde_json::to_value(entry) {
                Ok(value) => {
                    map.insert(url.clone(), value);
                }
                Err(err) => {
                    tracing::warn!(url, error = %err, "failed to serialize cache index entry");
                }
            }
        }
        self.dirty = false;
        self.last_flushed_ms = now_ms;
        Some(Value::Object(map))
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::IndexState;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn unparsable_entries_are_set_aside() {
        let mut state = IndexState::from_persisted(
            Some(json!({
                "https://a": {"size": 10, "createdAt": 1, "lastAccess": 2},
                "https://b": {"size": "big"},
                "https://c": 7,
            })),
            100,
        );
        assert_eq!(state.len(), 1);
        let mut malformed = state.take_malformed();
        malformed.sort();
        assert_eq!(malformed, vec!["https://b", "https://c"]);
    }

    #[test]
    fn non_object_index_starts_empty_and_dirty() {
        let mut state = IndexState::from_persisted(Some(json!([1, 2])), 100);
        assert_eq!(state.len(), 0);
        assert_eq!(state.prepare_flush(100), Some(json!({})));
    }

    #[test]
    fn touch_preserves_creation_only_when_asked() {
        let mut state = IndexState::default();
        assert!(state.touch("u", 5, false, 1_000));
        assert!(!state.touch("u", 6, true, 2_000));
        let entry = state.get("u").unwrap();
        assert_eq!((entry.size, entry.created_at, entry.last_access), (6, 1_000, 2_000));

        state.touch("u", 6, false, 3_000);
        assert_eq!(state.get("u").unwrap().created_at, 3_000);
    }

    #[test]
    fn flush_waits_for_interval_and_clears_dirty() {
        let mut state = IndexState::from_persisted(None, 1_000);
        assert!(!state.should_flush(5_000, Duration::from_secs(1)));
        state.touch("u", 1, false, 1_100);
        assert!(!state.should_flush(1_500, Duration::from_secs(1)));
        assert!(state.should_flush(2_000, Duration::from_secs(1)));

        let value = state.prepare_flush(2_000).unwrap();
        assert_eq!(
            value,
            json!({"u": {"size": 1, "createdAt": 1_100, "lastAccess": 1_100}})
        );
        assert!(state.prepare_flush(2_001).is_none());
    }

    #[test]
    fn remove_if_unchanged_skips_touched_entries() {
        let mut state = IndexState::default();
        state.touch("u", 1, false, 10);
        let seen = state.get("u").unwrap();
        state.touch("u", 1, true, 20);
        assert!(!state.remove_if_unchanged("u", &seen));
        let seen = state.get("u").unwrap();
        assert!(state.remove_if_unchanged("u", &seen));
    }
}
