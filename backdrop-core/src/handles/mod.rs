//! Reference-counted registry of in-memory blobs.
//!
//! The manager is the only component allowed to physically free a blob.
//! Everyone else holds [`BlobHandle`] values and must `release` (or release
//! the whole scope) on every exit path, or hold a [`BlobLease`].

mod lease;
mod stats;

pub use lease::BlobLease;
pub use stats::HandleStatsSnapshot;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use backdrop_model::{BlobHandle, HandleScope};
use dashmap::DashMap;
use stats::HandleStats;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HandleManagerOptions {
    /// Period of the leak sweep.
    pub sweep_interval: Duration,
    /// Minimum idle time before an unreferenced handle is swept.
    pub grace: Duration,
}

impl Default for HandleManagerOptions {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            grace: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Slot {
    data: Arc<[u8]>,
    ref_count: i64,
    created_at: Instant,
    touched_at: Instant,
    scope: HandleScope,
}

#[derive(Debug)]
pub struct HandleManager {
    slots: DashMap<BlobHandle, Slot>,
    scopes: DashMap<HandleScope, HashSet<BlobHandle>>,
    options: HandleManagerOptions,
    sweeper_running: AtomicBool,
    stats: HandleStats,
}

impl HandleManager {
    pub fn new(options: HandleManagerOptions) -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            scopes: DashMap::new(),
            options,
            sweeper_running: AtomicBool::new(false),
            stats: HandleStats::default(),
        })
    }

    /// Register `data` and return a handle with a reference count of one.
    pub fn create(
        self: &Arc<Self>,
        data: impl Into<Arc<[u8]>>,
        scope: impl Into<HandleScope>,
    ) -> BlobHandle {
        let data = data.into();
        let scope = scope.into();
        let handle = BlobHandle::new(format!(
            "{}{}",
            BlobHandle::PREFIX,
            Uuid::new_v4().simple()
        ));
        let now = Instant::now();
        let len = data.len() as u64;

        self.slots.insert(
            handle.clone(),
            Slot {
                data,
                ref_count: 1,
                created_at: now,
                touched_at: now,
                scope: scope.clone(),
            },
        );
        self.scopes
            .entry(scope)
            .or_default()
            .insert(handle.clone());
        self.stats.on_created(len);

        self.ensure_sweeper();
        handle
    }

    /// Create a handle and wrap its initial reference in a lease.
    pub fn create_leased(
        self: &Arc<Self>,
        data: impl Into<Arc<[u8]>>,
        scope: impl Into<HandleScope>,
    ) -> BlobLease {
        let handle = self.create(data, scope);
        BlobLease::new(Arc::clone(self), handle)
    }

    /// Take an additional reference. Returns false for unknown handles.
    pub fn retain(&self, handle: &BlobHandle) -> bool {
        match self.slots.get_mut(handle) {
            Some(mut slot) => {
                slot.ref_count += 1;
                slot.touched_at = Instant::now();
                self.stats.on_retained();
                true
            }
            None => false,
        }
    }

    /// Retain `handle` and return a lease owning the new reference.
    pub fn lease(self: &Arc<Self>, handle: &BlobHandle) -> Option<BlobLease> {
        self.retain(handle)
            .then(|| BlobLease::new(Arc::clone(self), handle.clone()))
    }

    /// Drop one reference; frees the blob at zero or when `force` is set.
    ///
    /// Returns true when the blob was freed. Unknown handles are a no-op.
    pub fn release(&self, handle: &BlobHandle, force: bool) -> bool {
        let should_free = match self.slots.get_mut(handle) {
            Some(mut slot) => {
                slot.ref_count -= 1;
                force || slot.ref_count <= 0
            }
            None => return false,
        };
        should_free && self.free(handle, false)
    }

    /// Force-release every handle created under `scope`.
    pub fn release_scope(&self, scope: &HandleScope) -> usize {
        let Some((_, handles)) = self.scopes.remove(scope) else {
            return 0;
        };
        let mut freed = 0;
        for handle in handles {
            if self.free(&handle, false) {
                freed += 1;
            }
        }
        if freed > 0 {
            tracing::debug!(scope = %scope, freed, "released handle scope");
        }
        freed
    }

    pub fn release_all(&self) -> usize {
        let handles: Vec<BlobHandle> =
            self.slots.iter().map(|e| e.key().clone()).collect();
        handles.iter().filter(|h| self.free(h, false)).count()
    }

    /// Shared bytes of a live handle; `None` once it has been freed.
    pub fn bytes(&self, handle: &BlobHandle) -> Option<Arc<[u8]>> {
        self.slots.get(handle).map(|slot| Arc::clone(&slot.data))
    }

    pub fn is_live(&self, handle: &BlobHandle) -> bool {
        self.slots.contains_key(handle)
    }

    pub fn ref_count(&self, handle: &BlobHandle) -> Option<i64> {
        self.slots.get(handle).map(|slot| slot.ref_count)
    }

    pub fn age(&self, handle: &BlobHandle) -> Option<Duration> {
        self.slots.get(handle).map(|slot| slot.created_at.elapsed())
    }

    pub fn scope_len(&self, scope: &HandleScope) -> usize {
        self.scopes.get(scope).map(|s| s.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> HandleStatsSnapshot {
        self.stats.snapshot(self.slots.len())
    }

    /// Free unreferenced handles idle for longer than the grace window.
    pub fn sweep_once(&self) -> usize {
        let grace = self.options.grace;
        let stale: Vec<BlobHandle> = self
            .slots
            .iter()
            .filter(|e| {
                e.value().ref_count <= 0 && e.value().touched_at.elapsed() > grace
            })
            .map(|e| e.key().clone())
            .collect();

        let swept = stale.iter().filter(|h| self.free(h, true)).count();
        if swept > 0 {
            tracing::warn!(swept, "swept unreferenced blob handles");
        }
        swept
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper_running.load(Ordering::SeqCst)
    }

    fn free(&self, handle: &BlobHandle, swept: bool) -> bool {
        let Some((_, slot)) = self.slots.remove(handle) else {
            return false;
        };
        let scope_now_empty = match self.scopes.get_mut(&slot.scope) {
            Some(mut members) => {
                members.remove(handle);
                members.is_empty()
            }
            None => false,
        };
        if scope_now_empty {
            self.scopes.remove_if(&slot.scope, |_, members| members.is_empty());
        }
        self.stats.on_freed(slot.data.len() as u64, swept);
        true
    }

    fn ensure_sweeper(self: &Arc<Self>) {
        if self.sweeper_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.sweeper_running.store(false, Ordering::SeqCst);
            return;
        };

        let weak = Arc::downgrade(self);
        let period = self.options.sweep_interval.max(Duration::from_millis(1));
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                manager.sweep_once();
                if !manager.is_empty() {
                    continue;
                }
                manager.sweeper_running.store(false, Ordering::SeqCst);
                // A create() racing with the store above saw the flag set and
                // skipped spawning; pick its handle up instead of stopping.
                if manager.is_empty()
                    || manager.sweeper_running.swap(true, Ordering::SeqCst)
                {
                    return;
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn set_ref_count_for_tests(&self, handle: &BlobHandle, count: i64) {
        if let Some(mut slot) = self.slots.get_mut(handle) {
            slot.ref_count = count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HandleManager, HandleManagerOptions};
    use backdrop_model::HandleScope;
    use std::time::Duration;

    fn manager() -> std::sync::Arc<HandleManager> {
        HandleManager::new(HandleManagerOptions {
            sweep_interval: Duration::from_millis(100),
            grace: Duration::from_millis(250),
        })
    }

    #[test]
    fn freed_iff_releases_cover_creates_and_retains() {
        let m = manager();
        let h = m.create(vec![1u8, 2, 3], "s");
        assert!(m.retain(&h));
        assert!(m.retain(&h));

        assert!(!m.release(&h, false));
        assert!(!m.release(&h, false));
        assert!(m.is_live(&h));
        assert!(m.release(&h, false));
        assert!(!m.is_live(&h));
        assert!(m.bytes(&h).is_none());

        // Double release and release of unknown handles are no-ops.
        assert!(!m.release(&h, false));
        assert!(!m.release(&backdrop_model::BlobHandle::new("blob:nope"), true));
        assert!(!m.retain(&h));
    }

    #[test]
    fn force_release_ignores_outstanding_references() {
        let m = manager();
        let h = m.create(vec![0u8; 8], "s");
        m.retain(&h);
        m.retain(&h);
        assert!(m.release(&h, true));
        assert!(m.is_empty());
        assert_eq!(m.stats().live_bytes, 0);
    }

    #[test]
    fn release_scope_frees_only_that_scope() {
        let m = manager();
        let a1 = m.create(vec![1u8], "a");
        let a2 = m.create(vec![2u8], "a");
        let b = m.create(vec![3u8], "b");
        m.retain(&a1);

        assert_eq!(m.release_scope(&HandleScope::new("a")), 2);
        assert!(!m.is_live(&a1));
        assert!(!m.is_live(&a2));
        assert!(m.is_live(&b));
        assert_eq!(m.scope_len(&HandleScope::new("a")), 0);
        assert_eq!(m.release_scope(&HandleScope::new("a")), 0);

        assert_eq!(m.release_all(), 1);
        assert!(m.is_empty());
    }

    #[test]
    fn freeing_last_member_drops_scope_bookkeeping() {
        let m = manager();
        let h = m.create(vec![9u8], "solo");
        assert_eq!(m.scope_len(&HandleScope::new("solo")), 1);
        m.release(&h, false);
        assert_eq!(m.scope_len(&HandleScope::new("solo")), 0);
    }

    #[test]
    fn lease_releases_on_drop() {
        let m = manager();
        let lease = m.create_leased(vec![1u8, 2], "lease");
        let h = lease.handle().clone();
        {
            let second = m.lease(&h).expect("live handle");
            assert_eq!(m.ref_count(&h), Some(2));
            assert_eq!(second.bytes().as_deref(), Some(&[1u8, 2][..]));
        }
        assert_eq!(m.ref_count(&h), Some(1));
        drop(lease);
        assert!(!m.is_live(&h));
    }

    #[test]
    fn into_handle_transfers_the_reference() {
        let m = manager();
        let h = m.create_leased(vec![1u8], "t").into_handle();
        assert_eq!(m.ref_count(&h), Some(1));
        assert!(m.release(&h, false));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_frees_unreferenced_handles_after_grace_and_stops() {
        let m = manager();
        let leaked = m.create(vec![0u8; 4], "leak");
        let held = m.create(vec![0u8; 4], "held");
        m.set_ref_count_for_tests(&leaked, 0);
        assert!(m.is_sweeping());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(m.is_live(&leaked), "still inside grace window");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!m.is_live(&leaked));
        assert!(m.is_live(&held));
        assert_eq!(m.stats().swept, 1);

        m.release(&held, false);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!m.is_sweeping());
    }
}
