//! Two-tier (thumbnail / full) store for user-curated backgrounds.
//!
//! Independent of the opportunistic byte cache: assets stay until the user
//! removes them, except that full images of unpinned records can be evicted
//! back to thumbnail-only when the configured budget is exceeded.
//!
//! Every public operation is total. Failures are logged and mapped to a safe
//! default (`false`, `None`, empty), and a burst of failures switches the
//! store into degraded mode where the database is not touched at all.

mod degraded;
mod eviction;
mod health;

pub use eviction::{FullImageEvictionPlan, FullImageUsage, plan_full_image_evictions};
pub use health::HEALTH_CHECK_LAST_RUN_KEY;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use backdrop_model::{
    AssetRecord, AssetStatus, AssetTier, BlobHandle, ByteSize, HandleScope,
    HealthCheckCandidate,
};
use serde_json::Value;

use crate::{
    error::{BackdropError, Result},
    handles::HandleManager,
    ports::{AssetDatabase, KeyValueStore, StorageArea},
    time::{Clock, duration_ms},
};
use degraded::DegradedGuard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetStoreLimits {
    /// Zero disables the count cap.
    pub max_full_images: usize,
    /// Zero disables the byte cap.
    pub max_full_bytes: ByteSize,
    pub eviction_batch: usize,
    pub eviction_delay: Duration,
    pub health_check_interval: Duration,
    pub health_check_batch: usize,
    pub degraded_threshold: u32,
    pub degraded_cooldown: Duration,
}

/// Upper bound on full images dropped per eviction pass.
pub const MAX_EVICTION_BATCH: usize = 20;

impl AssetStoreLimits {
    pub const fn defaults() -> Self {
        Self {
            max_full_images: 50,
            max_full_bytes: ByteSize::from_mib(500),
            eviction_batch: 20,
            eviction_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(24 * 60 * 60),
            health_check_batch: 25,
            degraded_threshold: 3,
            degraded_cooldown: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for AssetStoreLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssetStoreStats {
    pub records: usize,
    pub thumbnails: usize,
    pub full_images: usize,
    pub full_bytes: u64,
    pub pinned: usize,
    pub invalid: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionOutcome {
    pub evicted: usize,
    pub usage_after: FullImageUsage,
    pub rescheduled: bool,
}

pub struct AssetStore {
    db: Arc<dyn AssetDatabase>,
    kv: Arc<dyn KeyValueStore>,
    handles: Arc<HandleManager>,
    limits: AssetStoreLimits,
    clock: Clock,
    guard: DegradedGuard,
    eviction_scheduled: AtomicBool,
    eviction_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for AssetStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetStore")
            .field("limits", &self.limits)
            .field("degraded", &self.guard.is_degraded())
            .finish_non_exhaustive()
    }
}

impl AssetStore {
    pub fn new(
        db: Arc<dyn AssetDatabase>,
        kv: Arc<dyn KeyValueStore>,
        handles: Arc<HandleManager>,
        limits: AssetStoreLimits,
        clock: Clock,
    ) -> Arc<Self> {
        let batch = limits.eviction_batch.clamp(1, MAX_EVICTION_BATCH);
        if batch != limits.eviction_batch {
            tracing::warn!(
                requested = limits.eviction_batch,
                batch,
                "eviction batch out of range; clamped"
            );
        }
        let limits = AssetStoreLimits {
            eviction_batch: batch,
            ..limits
        };
        let guard = DegradedGuard::new(limits.degraded_threshold, limits.degraded_cooldown);
        Arc::new(Self {
            db,
            kv,
            handles,
            limits,
            clock,
            guard,
            eviction_scheduled: AtomicBool::new(false),
            eviction_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn limits(&self) -> &AssetStoreLimits {
        &self.limits
    }

    pub fn is_degraded(&self) -> bool {
        self.guard.is_degraded()
    }

    /// Leave degraded mode immediately, e.g. after the host reports the
    /// database is reachable again.
    pub fn reset_degraded(&self) {
        self.guard.reset();
    }

    /// Create or refresh the thumbnail tier of `id`.
    pub async fn save_thumbnail(
        &self,
        id: &str,
        bytes: &[u8],
        provider: &str,
        source_url: &str,
    ) -> bool {
        self.guard
            .run("save_thumbnail", false, || async {
                let now = self.clock.now_ms();
                let record = match self.db.get(id).await? {
                    Some(mut existing) => {
                        existing.thumbnail_size = Some(bytes.len() as u64);
                        existing.provider = provider.to_string();
                        existing.source_url = source_url.to_string();
                        existing.cached_at = now;
                        existing.last_accessed_at = now;
                        existing
                    }
                    None => AssetRecord::new_thumbnail(
                        id,
                        provider,
                        source_url,
                        bytes.len() as u64,
                        now,
                    ),
                };
                self.db.put_blob(id, AssetTier::Thumbnail, bytes).await?;
                self.db.put(&record).await?;
                tracing::debug!(id, bytes = bytes.len(), "saved asset thumbnail");
                Ok(true)
            })
            .await
    }

    pub async fn get_thumbnail(&self, id: &str) -> Option<Vec<u8>> {
        self.guard
            .run("get_thumbnail", None, || self.read_tier(id, AssetTier::Thumbnail))
            .await
    }

    pub async fn has_thumbnail(&self, id: &str) -> bool {
        self.guard
            .run("has_thumbnail", false, || async {
                Ok(self
                    .db
                    .get(id)
                    .await?
                    .is_some_and(|r| r.has_thumbnail()))
            })
            .await
    }

    /// Store the full-resolution tier. Refused unless a thumbnail record
    /// already exists.
    pub async fn save_full_image(self: &Arc<Self>, id: &str, bytes: &[u8]) -> bool {
        let saved = self
            .guard
            .run("save_full_image", false, || async {
                let Some(mut record) = self.db.get(id).await? else {
                    tracing::warn!(id, "refusing full image without a thumbnail record");
                    return Ok(false);
                };
                if !record.has_thumbnail() {
                    tracing::warn!(id, "refusing full image without a thumbnail");
                    return Ok(false);
                }
                self.db.put_blob(id, AssetTier::Full, bytes).await?;
                record.full_size = Some(bytes.len() as u64);
                record.last_accessed_at = self.clock.now_ms();
                self.db.put(&record).await?;
                tracing::debug!(id, bytes = bytes.len(), "saved full image");
                Ok(true)
            })
            .await;

        if saved {
            self.schedule_eviction();
        }
        saved
    }

    pub async fn get_full_image(&self, id: &str) -> Option<Vec<u8>> {
        self.guard
            .run("get_full_image", None, || self.read_tier(id, AssetTier::Full))
            .await
    }

    /// Drop the full tier, leaving the record thumbnail-only. A record left
    /// with no tier at all is deleted.
    pub async fn delete_full_image(&self, id: &str) -> bool {
        self.guard
            .run("delete_full_image", false, || self.drop_full_tier(id, false))
            .await
    }

    /// Remove the record and release any handles issued for it.
    pub async fn delete(&self, id: &str) -> bool {
        self.handles.release_scope(&HandleScope::for_asset(id));
        self.guard
            .run("delete", false, || async {
                let existed = self.db.get(id).await?.is_some();
                self.db.delete(id).await?;
                Ok(existed)
            })
            .await
    }

    pub async fn set_user_pinned(&self, id: &str, pinned: bool) -> bool {
        self.guard
            .run("set_user_pinned", false, || {
                self.update_record(id, move |r| r.is_user_pinned = pinned)
            })
            .await
    }

    pub async fn set_status(&self, id: &str, status: AssetStatus) -> bool {
        self.guard
            .run("set_status", false, || {
                self.update_record(id, move |r| r.status = status)
            })
            .await
    }

    /// Flag every id in `ids` as invalid. Records are never deleted here.
    pub async fn mark_as_invalid(&self, ids: &[String]) -> usize {
        self.guard
            .run("mark_as_invalid", 0, || async {
                let mut flagged = 0;
                for id in ids {
                    if let Some(mut record) = self.db.get(id).await? {
                        if !record.is_invalid() {
                            record.status = AssetStatus::Invalid;
                            self.db.put(&record).await?;
                        }
                        flagged += 1;
                    }
                }
                if flagged > 0 {
                    tracing::info!(flagged, "assets marked invalid");
                }
                Ok(flagged)
            })
            .await
    }

    /// Candidates for the external existence check, or nothing when the last
    /// run is more recent than the configured interval.
    pub async fn health_check_candidates(&self) -> Vec<HealthCheckCandidate> {
        let now = self.clock.now_ms();
        let last_run = match self
            .kv
            .get(StorageArea::Local, HEALTH_CHECK_LAST_RUN_KEY)
            .await
        {
            Ok(value) => value.and_then(|v| v.as_u64()),
            Err(err) => {
                tracing::debug!(error = %err, "health check gate unreadable; treating as due");
                None
            }
        };
        if !health::is_due(last_run, now, duration_ms(self.limits.health_check_interval)) {
            return Vec::new();
        }

        let Some(candidates) = self
            .guard
            .run("health_check_candidates", None, || async {
                let records = self.db.list_by_last_access().await?;
                Ok(Some(health::select_candidates(
                    &records,
                    self.limits.health_check_batch,
                )))
            })
            .await
        else {
            return Vec::new();
        };

        if let Err(err) = self
            .kv
            .set(StorageArea::Local, HEALTH_CHECK_LAST_RUN_KEY, Value::from(now))
            .await
        {
            tracing::warn!(error = %err, "failed to record health check run");
        }
        candidates
    }

    /// Issue a handle for the best available tier of `id`, scoped to the
    /// asset so [`AssetStore::delete`] can release it.
    pub async fn object_url(&self, id: &str) -> Option<BlobHandle> {
        let bytes = self
            .guard
            .run("object_url", None, || async {
                let Some(record) = self.db.get(id).await? else {
                    return Ok(None);
                };
                let tier = if record.has_full() {
                    AssetTier::Full
                } else if record.has_thumbnail() {
                    AssetTier::Thumbnail
                } else {
                    return Ok(None);
                };
                self.read_tier(id, tier).await
            })
            .await?;
        Some(self.handles.create(bytes, HandleScope::for_asset(id)))
    }

    pub async fn stats(&self) -> AssetStoreStats {
        let mut stats = self
            .guard
            .run("stats", AssetStoreStats::default(), || async {
                let records = self.db.list_by_last_access().await?;
                let usage = FullImageUsage::of(&records);
                Ok(AssetStoreStats {
                    records: records.iter().filter(|r| !r.is_empty()).count(),
                    thumbnails: records.iter().filter(|r| r.has_thumbnail()).count(),
                    full_images: usage.count,
                    full_bytes: usage.bytes,
                    pinned: records.iter().filter(|r| r.is_user_pinned).count(),
                    invalid: records.iter().filter(|r| r.is_invalid()).count(),
                    degraded: false,
                })
            })
            .await;
        stats.degraded = self.guard.is_degraded();
        stats
    }

    /// Trim full images of unpinned records until the budget holds, at most
    /// one batch per call. Schedules a follow-up pass while still over.
    pub async fn evict_if_needed(self: &Arc<Self>) -> EvictionOutcome {
        let _exclusive = self.eviction_lock.lock().await;

        let Some(records) = self
            .guard
            .run("evict_if_needed", None, || async {
                Ok(Some(self.db.list_by_last_access().await?))
            })
            .await
        else {
            return EvictionOutcome::default();
        };

        let plan = plan_full_image_evictions(
            &records,
            self.limits.max_full_images,
            self.limits.max_full_bytes.as_bytes(),
            self.limits.eviction_batch,
        );
        if plan.ids.is_empty() {
            return EvictionOutcome {
                usage_after: plan.usage_after,
                ..EvictionOutcome::default()
            };
        }

        let mut evicted = 0;
        for id in &plan.ids {
            let dropped = self
                .guard
                .run("evict_full_image", false, || self.drop_full_tier(id, true))
                .await;
            if dropped {
                evicted += 1;
            }
        }

        let rescheduled = plan.needs_another_pass && evicted > 0;
        tracing::info!(
            evicted,
            full_images = plan.usage_after.count,
            full_bytes = plan.usage_after.bytes,
            rescheduled,
            "asset store evicted full images"
        );
        if rescheduled {
            self.schedule_eviction();
        }

        EvictionOutcome {
            evicted,
            usage_after: plan.usage_after,
            rescheduled,
        }
    }

    /// Run [`AssetStore::evict_if_needed`] once the store has been quiet
    /// for the eviction delay.
    pub fn schedule_eviction(self: &Arc<Self>) {
        if self.eviction_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.eviction_scheduled.store(false, Ordering::SeqCst);
            return;
        };
        let weak = Arc::downgrade(self);
        let delay = self.limits.eviction_delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(store) = weak.upgrade() else {
                return;
            };
            store.eviction_scheduled.store(false, Ordering::SeqCst);
            store.evict_if_needed().await;
        });
    }

    pub fn is_eviction_scheduled(&self) -> bool {
        self.eviction_scheduled.load(Ordering::SeqCst)
    }

    async fn read_tier(&self, id: &str, tier: AssetTier) -> Result<Option<Vec<u8>>> {
        let Some(mut record) = self.db.get(id).await? else {
            return Ok(None);
        };
        if !record.has_tier(tier) {
            return Ok(None);
        }
        let Some(bytes) = self.db.get_blob(id, tier).await? else {
            tracing::warn!(id, %tier, "asset record points at a missing blob");
            return Ok(None);
        };
        record.last_accessed_at = self.clock.now_ms();
        self.db.put(&record).await?;
        Ok(Some(bytes))
    }

    /// With `respect_pin`, a record pinned since the eviction plan was made
    /// keeps its full image.
    async fn drop_full_tier(&self, id: &str, respect_pin: bool) -> Result<bool> {
        let Some(mut record) = self.db.get(id).await? else {
            return Ok(false);
        };
        if !record.has_full() {
            return Ok(false);
        }
        if respect_pin && record.is_user_pinned {
            tracing::debug!(id, "skipping eviction of a pinned full image");
            return Ok(false);
        }
        self.db.delete_blob(id, AssetTier::Full).await?;
        record.full_size = None;
        if record.is_empty() {
            self.db.delete(id).await?;
        } else {
            self.db.put(&record).await?;
        }
        Ok(true)
    }

    async fn update_record(
        &self,
        id: &str,
        apply: impl FnOnce(&mut AssetRecord),
    ) -> Result<bool> {
        let Some(mut record) = self.db.get(id).await? else {
            return Ok(false);
        };
        if record.is_empty() {
            return Err(BackdropError::NotFound(format!("asset {id} has no blobs")));
        }
        apply(&mut record);
        self.db.put(&record).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{AssetStore, AssetStoreLimits, HEALTH_CHECK_LAST_RUN_KEY, MAX_EVICTION_BATCH};
    use crate::{
        error::BackdropError,
        handles::{HandleManager, HandleManagerOptions},
        infra::memory::{MemoryAssetDatabase, MemoryKeyValueStore},
        ports::{KeyValueStore, StorageArea, asset_db::MockAssetDatabase},
        time::Clock,
    };
    use backdrop_model::{AssetRecord, AssetStatus, AssetTier, ByteSize, HandleScope};
    use std::{
        sync::{Arc, atomic::Ordering},
        time::Duration,
    };

    struct Harness {
        store: Arc<AssetStore>,
        db: Arc<MemoryAssetDatabase>,
        kv: Arc<MemoryKeyValueStore>,
        handles: Arc<HandleManager>,
        now: Arc<std::sync::atomic::AtomicU64>,
    }

    fn harness(limits: AssetStoreLimits) -> Harness {
        let db = Arc::new(MemoryAssetDatabase::new());
        let kv = Arc::new(MemoryKeyValueStore::new());
        let handles = HandleManager::new(HandleManagerOptions::default());
        let (clock, now) = Clock::manual(10_000);
        let store = AssetStore::new(db.clone(), kv.clone(), Arc::clone(&handles), limits, clock);
        Harness {
            store,
            db,
            kv,
            handles,
            now,
        }
    }

    fn small_limits() -> AssetStoreLimits {
        AssetStoreLimits {
            max_full_images: 2,
            max_full_bytes: ByteSize::ZERO,
            eviction_delay: Duration::from_millis(10),
            ..AssetStoreLimits::defaults()
        }
    }

    #[tokio::test]
    async fn full_image_requires_thumbnail() {
        let h = harness(AssetStoreLimits::defaults());
        assert!(!h.store.save_full_image("a", b"full").await);
        assert!(h.store.get_full_image("a").await.is_none());

        assert!(h.store.save_thumbnail("a", b"thumb", "unsplash", "https://x/a").await);
        assert!(h.store.has_thumbnail("a").await);
        assert!(h.store.save_full_image("a", b"full").await);
        assert_eq!(h.store.get_full_image("a").await.as_deref(), Some(&b"full"[..]));
        assert_eq!(h.store.get_thumbnail("a").await.as_deref(), Some(&b"thumb"[..]));
    }

    #[tokio::test]
    async fn deleting_full_image_degrades_to_thumbnail_only() {
        let h = harness(AssetStoreLimits::defaults());
        h.store.save_thumbnail("a", b"t", "p", "https://x/a").await;
        h.store.save_full_image("a", b"f").await;

        assert!(h.store.delete_full_image("a").await);
        assert!(h.store.get_full_image("a").await.is_none());
        assert!(h.store.has_thumbnail("a").await);
        assert!(h.db.blob_len("a", AssetTier::Full).is_none());
        assert!(!h.store.delete_full_image("a").await);
    }

    #[tokio::test]
    async fn delete_releases_object_urls() {
        let h = harness(AssetStoreLimits::defaults());
        h.store.save_thumbnail("a", b"thumb", "p", "https://x/a").await;
        h.store.save_full_image("a", b"full-bytes").await;

        let handle = h.store.object_url("a").await.unwrap();
        assert_eq!(h.handles.bytes(&handle).as_deref(), Some(&b"full-bytes"[..]));
        assert_eq!(h.handles.scope_len(&HandleScope::for_asset("a")), 1);

        assert!(h.store.delete("a").await);
        assert!(!h.handles.is_live(&handle));
        assert!(!h.store.has_thumbnail("a").await);
        assert!(h.store.object_url("a").await.is_none());
    }

    #[tokio::test]
    async fn eviction_trims_oldest_unpinned_full_images() {
        let h = harness(AssetStoreLimits {
            eviction_delay: Duration::from_secs(3600),
            ..small_limits()
        });
        for id in ["a", "b", "c", "d"] {
            h.now.fetch_add(100, Ordering::SeqCst);
            h.store.save_thumbnail(id, b"t", "p", "https://x").await;
            h.store.save_full_image(id, b"full").await;
        }
        // "a" is the oldest but pinned.
        h.store.set_user_pinned("a", true).await;

        let outcome = h.store.evict_if_needed().await;
        assert_eq!(outcome.evicted, 2);
        assert!(h.store.get_full_image("a").await.is_some());
        assert!(h.db.blob_len("b", AssetTier::Full).is_none());
        assert!(h.db.blob_len("c", AssetTier::Full).is_none());
        assert!(h.db.blob_len("d", AssetTier::Full).is_some());

        let stats = h.store.stats().await;
        assert_eq!((stats.full_images, stats.pinned, stats.records), (2, 1, 4));
    }

    #[tokio::test]
    async fn eviction_skips_a_record_pinned_after_planning() {
        let full = |id: &str, at: u64, pinned: bool| AssetRecord {
            full_size: Some(4),
            last_accessed_at: at,
            is_user_pinned: pinned,
            ..AssetRecord::new_thumbnail(id, "p", "https://x", 1, at)
        };
        let mut db = MockAssetDatabase::new();
        db.expect_list_by_last_access().times(1).returning(move || {
            Ok(vec![full("a", 1, false), full("b", 2, false), full("c", 3, false)])
        });
        // The user pinned "a" while the plan was being made.
        db.expect_get()
            .returning(move |_| Ok(Some(full("a", 1, true))));
        db.expect_delete_blob().never();
        db.expect_put().never();

        let store = AssetStore::new(
            Arc::new(db),
            Arc::new(MemoryKeyValueStore::new()),
            HandleManager::new(HandleManagerOptions::default()),
            AssetStoreLimits {
                eviction_delay: Duration::from_secs(3600),
                ..small_limits()
            },
            Clock::system(),
        );

        let outcome = store.evict_if_needed().await;
        assert_eq!(outcome.evicted, 0);
        assert!(!outcome.rescheduled);
        assert!(!store.is_degraded());
    }

    #[test]
    fn eviction_batch_is_clamped() {
        let oversized = harness(AssetStoreLimits {
            eviction_batch: 500,
            ..AssetStoreLimits::defaults()
        });
        assert_eq!(oversized.store.limits().eviction_batch, MAX_EVICTION_BATCH);

        let zero = harness(AssetStoreLimits {
            eviction_batch: 0,
            ..AssetStoreLimits::defaults()
        });
        assert_eq!(zero.store.limits().eviction_batch, 1);
    }

    #[tokio::test]
    async fn zero_batch_still_makes_progress() {
        let h = harness(AssetStoreLimits {
            eviction_batch: 0,
            eviction_delay: Duration::from_secs(3600),
            ..small_limits()
        });
        for id in ["a", "b", "c", "d"] {
            h.now.fetch_add(100, Ordering::SeqCst);
            h.store.save_thumbnail(id, b"t", "p", "https://x").await;
            h.store.save_full_image(id, b"full").await;
        }

        let outcome = h.store.evict_if_needed().await;
        assert_eq!(outcome.evicted, 1);
        assert!(outcome.rescheduled);
        assert!(h.db.blob_len("a", AssetTier::Full).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn saving_full_images_schedules_eviction() {
        let h = harness(small_limits());
        for id in ["a", "b", "c"] {
            h.now.fetch_add(1, Ordering::SeqCst);
            h.store.save_thumbnail(id, b"t", "p", "https://x").await;
            h.store.save_full_image(id, b"full").await;
        }
        assert!(h.store.is_eviction_scheduled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.store.stats().await.full_images, 2);
    }

    #[tokio::test]
    async fn health_check_is_gated_and_only_flags() {
        let h = harness(AssetStoreLimits {
            health_check_interval: Duration::from_secs(60),
            ..AssetStoreLimits::defaults()
        });
        h.store.save_thumbnail("a", b"t", "p", "https://x/a").await;
        h.store.save_thumbnail("b", b"t", "p", "https://x/b").await;

        let batch = h.store.health_check_candidates().await;
        assert_eq!(batch.len(), 2);
        assert!(h.store.health_check_candidates().await.is_empty());
        assert!(
            h.kv.get(StorageArea::Local, HEALTH_CHECK_LAST_RUN_KEY)
                .await
                .unwrap()
                .is_some()
        );

        assert_eq!(h.store.mark_as_invalid(&["a".to_string(), "zz".to_string()]).await, 1);
        assert!(h.store.has_thumbnail("a").await);

        h.now.fetch_add(61_000, Ordering::SeqCst);
        let batch = h.store.health_check_candidates().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "b");
    }

    #[tokio::test]
    async fn status_and_pin_updates_need_an_existing_record() {
        let h = harness(AssetStoreLimits::defaults());
        assert!(!h.store.set_user_pinned("ghost", true).await);
        h.store.save_thumbnail("a", b"t", "p", "https://x/a").await;
        assert!(h.store.set_status("a", AssetStatus::Invalid).await);
        assert_eq!(h.store.stats().await.invalid, 1);
    }

    #[tokio::test]
    async fn degraded_store_never_reaches_the_database() {
        let mut db = MockAssetDatabase::new();
        db.expect_get()
            .times(3)
            .returning(|_| Err(BackdropError::Storage("disk gone".into())));

        let handles = HandleManager::new(HandleManagerOptions::default());
        let store = AssetStore::new(
            Arc::new(db),
            Arc::new(MemoryKeyValueStore::new()),
            handles,
            AssetStoreLimits::defaults(),
            Clock::system(),
        );

        for _ in 0..3 {
            assert!(store.get_thumbnail("a").await.is_none());
        }
        assert!(store.is_degraded());

        // The mock panics on a fourth `get`; every call below must short-circuit.
        assert!(!store.has_thumbnail("a").await);
        assert!(store.get_full_image("a").await.is_none());
        assert!(!store.save_thumbnail("a", b"t", "p", "u").await);
        assert!(store.object_url("a").await.is_none());
        assert_eq!(store.mark_as_invalid(&["a".to_string()]).await, 0);
        assert!(store.stats().await.degraded);
    }

    #[tokio::test]
    async fn one_success_resets_the_failure_streak() {
        let h = harness(AssetStoreLimits::defaults());
        h.store.save_thumbnail("a", b"t", "p", "https://x/a").await;

        h.db.fail_next(2);
        assert!(!h.store.has_thumbnail("a").await);
        assert!(!h.store.has_thumbnail("a").await);
        assert!(h.store.has_thumbnail("a").await);

        h.db.fail_next(2);
        h.store.has_thumbnail("a").await;
        h.store.has_thumbnail("a").await;
        assert!(!h.store.is_degraded());
        assert!(h.store.has_thumbnail("a").await);
    }
}
