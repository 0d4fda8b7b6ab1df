use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheIndexStatsSnapshot {
    pub touches: u64,
    pub cache_hits: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub write_through_failures: u64,
    pub index_flushes: u64,
    pub index_flush_errors: u64,
    pub cleanup_runs: u64,
    pub removed_malformed: u64,
    pub removed_ttl: u64,
    pub removed_over_budget: u64,
    pub removed_orphans: u64,
    pub last_cleanup_duration_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CacheIndexStats {
    touches: AtomicU64,
    cache_hits: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    write_through_failures: AtomicU64,
    index_flushes: AtomicU64,
    index_flush_errors: AtomicU64,
    cleanup_runs: AtomicU64,
    removed_malformed: AtomicU64,
    removed_ttl: AtomicU64,
    removed_over_budget: AtomicU64,
    removed_orphans: AtomicU64,
    last_cleanup_duration_ms: AtomicU64,
}

impl CacheIndexStats {
    pub fn on_touch(&self) {
        self.touches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_fetch(&self, ok: bool) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_write_through_err(&self) {
        self.write_through_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_flush(&self, ok: bool) {
        if ok {
            self.index_flushes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.index_flush_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_cleanup_finished(
        &self,
        malformed: u64,
        ttl: u64,
        over_budget: u64,
        orphans: u64,
        duration_ms: u64,
    ) {
        self.cleanup_runs.fetch_add(1, Ordering::Relaxed);
        self.removed_malformed.fetch_add(malformed, Ordering::Relaxed);
        self.removed_ttl.fetch_add(ttl, Ordering::Relaxed);
        self.removed_over_budget
            .fetch_add(over_budget, Ordering::Relaxed);
        self.removed_orphans.fetch_add(orphans, Ordering::Relaxed);
        self.last_cleanup_duration_ms
            .store(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheIndexStatsSnapshot {
        CacheIndexStatsSnapshot {
            touches: self.touches.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            write_through_failures: self
                .write_through_failures
                .load(Ordering::Relaxed),
            index_flushes: self.index_flushes.load(Ordering::Relaxed),
            index_flush_errors: self.index_flush_errors.load(Ordering::Relaxed),
            cleanup_runs: self.cleanup_runs.load(Ordering::Relaxed),
            removed_malformed: self.removed_malformed.load(Ordering::Relaxed),
            removed_ttl: self.removed_ttl.load(Ordering::Relaxed),
            removed_over_budget: self
                .removed_over_budget
                .load(Ordering::Relaxed),
            removed_orphans: self.removed_orphans.load(Ordering::Relaxed),
            last_cleanup_duration_ms: self
                .last_cleanup_duration_ms
                .load(Ordering::Relaxed),
        }
    }
}
