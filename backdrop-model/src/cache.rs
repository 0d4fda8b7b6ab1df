/// Metadata tracked by the cache index for one byte-cache object.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CacheIndexEntry {
    pub size: u64,
    pub created_at: u64,
    pub last_access: u64,
}

impl CacheIndexEntry {
    pub const fn new(size: u64, now_ms: u64) -> Self {
        Self {
            size,
            created_at: now_ms,
            last_access: now_ms,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        ttl_ms > 0 && self.age_ms(now_ms) > ttl_ms
    }
}
