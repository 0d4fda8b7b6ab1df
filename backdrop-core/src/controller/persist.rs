use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    error::Result,
    ports::{KeyValueStore, StorageArea},
};

/// Coalesces rapid writes of one key: only the latest value pending when the
/// debounce window closes is written.
pub struct DebouncedWriter {
    kv: Arc<dyn KeyValueStore>,
    area: StorageArea,
    key: String,
    debounce: Duration,
    pending: parking_lot::Mutex<Option<Value>>,
    scheduled: AtomicBool,
    write_lock: Mutex<()>,
}

impl fmt::Debug for DebouncedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncedWriter")
            .field("area", &self.area)
            .field("key", &self.key)
            .field("debounce", &self.debounce)
            .field("pending", &self.pending.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl DebouncedWriter {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        area: StorageArea,
        key: impl Into<String>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            kv,
            area,
            key: key.into(),
            debounce,
            pending: parking_lot::Mutex::new(None),
            scheduled: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Replace the pending value and arm the timer if it is not running.
    pub fn schedule(self: &Arc<Self>, value: Value) {
        *self.pending.lock() = Some(value);
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.scheduled.store(false, Ordering::SeqCst);
            return;
        };

        let weak = Arc::downgrade(self);
        let delay = self.debounce;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.scheduled.store(false, Ordering::SeqCst);
            if let Err(err) = this.flush().await {
                tracing::warn!(key = %this.key, error = %err, "debounced write failed");
            }
        });
    }

    /// Write the pending value now. A failed write puts the value back unless
    /// a newer one arrived meanwhile.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(value) = self.pending.lock().take() else {
            return Ok(());
        };
        match self.kv.set(self.area, &self.key, value.clone()).await {
            Ok(()) => {
                tracing::debug!(key = %self.key, "persisted");
                Ok(())
            }
            Err(err) => {
                self.pending.lock().get_or_insert(value);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DebouncedWriter;
    use crate::{
        infra::MemoryKeyValueStore,
        ports::{KeyValueStore, StorageArea},
    };
    use serde_json::json;
    use std::{sync::Arc, time::Duration};

    #[tokio::test(start_paused = true)]
    async fn rapid_writes_collapse_into_the_last_value() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut changes = kv.subscribe();
        let writer =
            DebouncedWriter::new(kv.clone(), StorageArea::Local, "current", Duration::from_millis(500));

        for n in 0..5 {
            writer.schedule(json!({ "n": n }));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(kv.get(StorageArea::Local, "current").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            kv.get(StorageArea::Local, "current").await.unwrap(),
            Some(json!({ "n": 4 }))
        );
        let change = changes.recv().await.unwrap();
        assert_eq!(change.new_value, Some(json!({ "n": 4 })));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_flush_keeps_the_value_for_a_retry() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let writer =
            DebouncedWriter::new(kv.clone(), StorageArea::Local, "current", Duration::from_secs(60));
        writer.schedule(json!(1));

        kv.set_failing(true);
        assert!(writer.flush().await.is_err());
        assert!(writer.has_pending());

        kv.set_failing(false);
        writer.flush().await.unwrap();
        assert!(!writer.has_pending());
        assert_eq!(kv.get(StorageArea::Local, "current").await.unwrap(), Some(json!(1)));
    }
}
