//! Metadata index over the URL-keyed byte cache.
//!
//! The index records size and timestamps for every object it believes the
//! byte cache holds, and drives TTL + LRU eviction over it. It is persisted
//! as one JSON object in the device-local storage area.

mod eviction;
mod index;
mod stats;

pub use eviction::{EvictionPlan, EvictionReason, PlannedEviction, plan_evictions};
pub use index::INDEX_STORAGE_KEY;
pub use stats::CacheIndexStatsSnapshot;

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use backdrop_model::{BlobHandle, ByteSize, CacheIndexEntry, HandleScope};
use dashmap::DashMap;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tokio::sync::{Mutex, Notify};

use crate::{
    error::Result,
    handles::HandleManager,
    log_once,
    ports::{ByteCache, Fetcher, KeyValueStore, StorageArea, fetch_bounded},
    time::{Clock, duration_ms},
};
use index::IndexState;
use stats::CacheIndexStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheIndexLimits {
    /// Zero disables the entry cap.
    pub max_entries: usize,
    /// Zero disables the byte cap.
    pub max_bytes: ByteSize,
    /// Maximum age measured from creation. Zero disables expiry.
    pub ttl: Duration,
    pub cleanup_debounce: Duration,
    pub fetch_timeout: Duration,
    pub flush_interval: Duration,
}

impl CacheIndexLimits {
    pub const fn defaults() -> Self {
        Self {
            max_entries: 200,
            max_bytes: ByteSize::from_mib(256),
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_debounce: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(15),
            flush_interval: Duration::from_secs(30),
        }
    }
}

impl Default for CacheIndexLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Outcome of one cleanup pass. Concurrent callers of
/// [`CacheIndex::cleanup`] all receive the same report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub removed_malformed: usize,
    pub removed_ttl: usize,
    pub removed_over_budget: usize,
    pub removed_orphans: usize,
    pub remaining_entries: usize,
    pub remaining_bytes: u64,
    pub duration_ms: u64,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.removed_malformed
            + self.removed_ttl
            + self.removed_over_budget
            + self.removed_orphans
    }
}

type InflightCleanup = Shared<BoxFuture<'static, CleanupReport>>;

pub struct CacheIndex {
    bytes: Arc<dyn ByteCache>,
    kv: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn Fetcher>,
    handles: Arc<HandleManager>,
    limits: CacheIndexLimits,
    clock: Clock,
    state: Mutex<IndexState>,
    flush_lock: Mutex<()>,
    inflight_cleanup: parking_lot::Mutex<Option<InflightCleanup>>,
    cleanup_scheduled: AtomicBool,
    pending_writes: AtomicUsize,
    /// Fetched bytes whose write-through has not landed yet.
    writing: DashMap<String, Arc<[u8]>>,
    writes_idle: Notify,
    stats: CacheIndexStats,
}

impl fmt::Debug for CacheIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheIndex")
            .field("limits", &self.limits)
            .field("pending_writes", &self.pending_writes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CacheIndex {
    /// Load the persisted index and return a ready instance.
    ///
    /// A storage failure while loading is logged and the index starts
    /// empty; orphaned byte-cache objects are then simply never served from
    /// the index until fetched again.
    pub async fn open(
        bytes: Arc<dyn ByteCache>,
        kv: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn Fetcher>,
        handles: Arc<HandleManager>,
        limits: CacheIndexLimits,
        clock: Clock,
    ) -> Arc<Self> {
        let persisted = match kv.get(StorageArea::Local, INDEX_STORAGE_KEY).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load cache index; starting empty");
                None
            }
        };
        let state = IndexState::from_persisted(persisted, clock.now_ms());
        tracing::debug!(entries = state.len(), "cache index loaded");

        Arc::new(Self {
            bytes,
            kv,
            fetcher,
            handles,
            limits,
            clock,
            state: Mutex::new(state),
            flush_lock: Mutex::new(()),
            inflight_cleanup: parking_lot::Mutex::new(None),
            cleanup_scheduled: AtomicBool::new(false),
            pending_writes: AtomicUsize::new(0),
            writing: DashMap::new(),
            writes_idle: Notify::new(),
            stats: CacheIndexStats::default(),
        })
    }

    pub fn limits(&self) -> &CacheIndexLimits {
        &self.limits
    }

    pub fn handles(&self) -> &Arc<HandleManager> {
        &self.handles
    }

    pub fn stats(&self) -> CacheIndexStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn get(&self, url: &str) -> Option<CacheIndexEntry> {
        self.state.lock().await.get(url)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn total_bytes(&self) -> u64 {
        self.state.lock().await.total_bytes()
    }

    /// Upsert the entry for `url` and flush if the interval has elapsed.
    pub async fn touch(&self, url: &str, size: u64, keep_created_at: bool) {
        self.stats.on_touch();
        let now_ms = self.clock.now_ms();
        let due = {
            let mut state = self.state.lock().await;
            state.touch(url, size, keep_created_at, now_ms);
            state.should_flush(now_ms, self.limits.flush_interval)
        };
        if due {
            self.flush().await;
        }
    }

    /// Delete the byte-cache object and its index entry.
    pub async fn remove(&self, url: &str) -> bool {
        self.delete_bytes_quietly(url).await;
        let removed = self.state.lock().await.remove(url);
        if removed {
            self.flush().await;
        }
        removed
    }

    /// Serve `url` from the byte cache, or fetch it and write it through.
    ///
    /// The returned handle belongs to `scope` and carries one reference the
    /// caller must release. The write-through runs in the background and
    /// does not delay the return.
    pub async fn get_cached_or_fetch(
        self: &Arc<Self>,
        url: &str,
        scope: impl Into<HandleScope>,
    ) -> Result<BlobHandle> {
        let scope = scope.into();

        let in_flight = self.writing.get(url).map(|data| Arc::clone(data.value()));
        if let Some(data) = in_flight {
            self.stats.on_hit();
            return Ok(self.handles.create(data, scope));
        }

        match self.bytes.get(url).await {
            Ok(Some(bytes)) => {
                self.stats.on_hit();
                let size = bytes.len() as u64;
                let handle = self.handles.create(bytes, scope);
                self.touch(url, size, true).await;
                return Ok(handle);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(url, error = %err, "byte cache lookup failed; fetching");
            }
        }

        let response =
            match fetch_bounded(self.fetcher.as_ref(), url, self.limits.fetch_timeout).await {
                Ok(response) => {
                    self.stats.on_fetch(true);
                    log_once::forget("fetch-fail", url);
                    response
                }
                Err(err) => {
                    self.stats.on_fetch(false);
                    log_once::log_fetch_failure_once(url, &err);
                    return Err(err);
                }
            };

        let data: Arc<[u8]> = Arc::from(response.bytes);
        let handle = self.handles.create(Arc::clone(&data), scope);
        self.spawn_write_through(url.to_string(), data);
        Ok(handle)
    }

    /// Resolve once every background write-through has settled.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.writes_idle.notified();
            if self.pending_writes.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Run one eviction pass. Concurrent callers share the in-flight pass.
    pub async fn cleanup(self: &Arc<Self>) -> CleanupReport {
        let inflight = {
            let mut slot = self.inflight_cleanup.lock();
            match slot.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let this = Arc::clone(self);
                    let shared = async move {
                        let report = this.run_cleanup().await;
                        this.inflight_cleanup.lock().take();
                        report
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        inflight.await
    }

    /// Request a cleanup after the debounce window. Requests arriving while
    /// one is pending are coalesced into it.
    pub fn schedule_cleanup(self: &Arc<Self>) {
        if self.cleanup_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.cleanup_scheduled.store(false, Ordering::SeqCst);
            return;
        };

        let weak = Arc::downgrade(self);
        let delay = self.limits.cleanup_debounce;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.cleanup_scheduled.store(false, Ordering::SeqCst);
            this.wait_idle().await;
            this.cleanup().await;
        });
    }

    pub fn is_cleanup_scheduled(&self) -> bool {
        self.cleanup_scheduled.load(Ordering::SeqCst)
    }

    /// Persist the index if anything changed since the last flush.
    pub async fn flush(&self) {
        let _guard = self.flush_lock.lock().await;
        let now_ms = self.clock.now_ms();
        let Some(snapshot) = self.state.lock().await.prepare_flush(now_ms) else {
            return;
        };

        match self
            .kv
            .set(StorageArea::Local, INDEX_STORAGE_KEY, snapshot)
            .await
        {
            Ok(()) => self.stats.on_flush(true),
            Err(err) => {
                self.stats.on_flush(false);
                tracing::warn!(error = %err, "cache index flush failed");
                self.state.lock().await.mark_dirty();
            }
        }
    }

    fn spawn_write_through(self: &Arc<Self>, url: String, data: Arc<[u8]>) {
        self.pending_writes.fetch_add(1, Ordering::SeqCst);
        self.writing.insert(url.clone(), Arc::clone(&data));
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.bytes.put(&url, &data).await {
                Ok(()) => this.touch(&url, data.len() as u64, false).await,
                Err(err) => {
                    this.stats.on_write_through_err();
                    tracing::warn!(url, error = %err, "byte cache write-through failed");
                }
            }
            this.writing.remove_if(&url, |_, pending| Arc::ptr_eq(pending, &data));
            if this.pending_writes.fetch_sub(1, Ordering::SeqCst) == 1 {
                this.writes_idle.notify_waiters();
            }
            this.schedule_cleanup();
        });
    }

    async fn run_cleanup(&self) -> CleanupReport {
        let start = Instant::now();
        let now_ms = self.clock.now_ms();

        let (snapshot, malformed) = {
            let mut state = self.state.lock().await;
            (state.snapshot(), state.take_malformed())
        };
        let scanned = snapshot.len() + malformed.len();

        let plan = plan_evictions(
            snapshot,
            now_ms,
            duration_ms(self.limits.ttl),
            self.limits.max_entries,
            self.limits.max_bytes.as_bytes(),
        );

        // Object and entry go together; a failed object delete is logged
        // and the entry is dropped anyway.
        for url in malformed
            .iter()
            .chain(plan.planned.iter().map(|p| &p.url))
        {
            self.delete_bytes_quietly(url).await;
        }

        let orphans = self.find_orphans(&plan.survivors).await;

        let (removed_orphans, remaining_entries, remaining_bytes) = {
            let mut state = self.state.lock().await;
            // A write-through that re-touched a planned URL while its object
            // was being deleted keeps its fresh entry.
            for planned in &plan.planned {
                if !state.remove_if_unchanged(&planned.url, &planned.entry) {
                    tracing::debug!(url = %planned.url, "eviction skipped; entry was refreshed");
                }
            }
            let removed_orphans = orphans
                .iter()
                .filter(|(url, seen)| state.remove_if_unchanged(url, seen))
                .count();
            (removed_orphans, state.len(), state.total_bytes())
        };
        self.flush().await;

        let report = CleanupReport {
            scanned,
            removed_malformed: malformed.len() + plan.count(EvictionReason::Malformed),
            removed_ttl: plan.count(EvictionReason::TtlExpired),
            removed_over_budget: plan.count(EvictionReason::OverEntryCap)
                + plan.count(EvictionReason::OverByteCap),
            removed_orphans,
            remaining_entries,
            remaining_bytes,
            duration_ms: duration_ms(start.elapsed()),
        };

        self.stats.on_cleanup_finished(
            report.removed_malformed as u64,
            report.removed_ttl as u64,
            report.removed_over_budget as u64,
            report.removed_orphans as u64,
            report.duration_ms,
        );

        if report.removed() > 0 {
            tracing::info!(
                removed = report.removed(),
                malformed = report.removed_malformed,
                ttl = report.removed_ttl,
                over_budget = report.removed_over_budget,
                orphans = report.removed_orphans,
                remaining = report.remaining_entries,
                remaining_bytes = report.remaining_bytes,
                duration_ms = report.duration_ms,
                "cache index cleanup finished"
            );
        }
        report
    }

    async fn find_orphans(
        &self,
        survivors: &[(String, CacheIndexEntry)],
    ) -> Vec<(String, CacheIndexEntry)> {
        if survivors.is_empty() {
            return Vec::new();
        }
        let present: HashSet<String> = match self.bytes.keys().await {
            Ok(keys) => keys.into_iter().collect(),
            Err(err) => {
                tracing::debug!(error = %err, "byte cache listing failed; skipping orphan pruning");
                return Vec::new();
            }
        };
        survivors
            .iter()
            .filter(|(url, _)| !present.contains(url))
            .cloned()
            .collect()
    }

    async fn delete_bytes_quietly(&self, url: &str) {
        if let Err(err) = self.bytes.delete(url).await {
            tracing::warn!(url, error = %err, "byte cache delete failed");
        }
    }
}
