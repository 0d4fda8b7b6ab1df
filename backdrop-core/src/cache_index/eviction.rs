use backdrop_model::CacheIndexEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    Malformed,
    TtlExpired,
    OverEntryCap,
    OverByteCap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEviction {
    pub url: String,
    /// Entry as planned; removal is skipped if it changed meanwhile.
    pub entry: CacheIndexEntry,
    pub reason: EvictionReason,
}

#[derive(Debug, Default)]
pub struct EvictionPlan {
    pub planned: Vec<PlannedEviction>,
    /// Entries that stay, in least-recently-used order.
    pub survivors: Vec<(String, CacheIndexEntry)>,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
}

impl EvictionPlan {
    pub fn count(&self, reason: EvictionReason) -> usize {
        self.planned.iter().filter(|p| p.reason == reason).count()
    }
}

/// Metadata that cannot describe a real cache write.
pub fn is_malformed(entry: &CacheIndexEntry, now_ms: u64) -> bool {
    entry.created_at == 0
        || entry.last_access < entry.created_at
        || entry.created_at > now_ms
}

/// Decide which entries a cleanup pass removes.
///
/// Malformed and expired entries go first, then survivors are popped in
/// least-recently-used order until both caps hold. A cap of zero is
/// treated as unbounded.
pub fn plan_evictions(
    entries: Vec<(String, CacheIndexEntry)>,
    now_ms: u64,
    ttl_ms: u64,
    max_entries: usize,
    max_bytes: u64,
) -> EvictionPlan {
    let mut plan = EvictionPlan {
        total_bytes_before: entries
            .iter()
            .fold(0u64, |acc, (_, e)| acc.saturating_add(e.size)),
        ..EvictionPlan::default()
    };

    let mut total_bytes = plan.total_bytes_before;
    let mut kept = Vec::with_capacity(entries.len());
    for (url, entry) in entries {
        let reason = if is_malformed(&entry, now_ms) {
            Some(EvictionReason::Malformed)
        } else if entry.is_expired(now_ms, ttl_ms) {
            Some(EvictionReason::TtlExpired)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                total_bytes = total_bytes.saturating_sub(entry.size);
                plan.planned.push(PlannedEviction {
                    url,
                    entry,
                    reason,
                });
            }
            None => kept.push((url, entry)),
        }
    }

    // Ties on last access fall back to the URL so plans are reproducible.
    kept.sort_by(|(ua, a), (ub, b)| {
        a.last_access.cmp(&b.last_access).then_with(|| ua.cmp(ub))
    });

    let over_entries = |len: usize| max_entries > 0 && len > max_entries;
    let over_bytes = |bytes: u64| max_bytes > 0 && bytes > max_bytes;

    let mut survivors = kept.into_iter();
    let mut remaining = survivors.len();
    while over_entries(remaining) || over_bytes(total_bytes) {
        let Some((url, entry)) = survivors.next() else {
            break;
        };
        let reason = if over_entries(remaining) {
            EvictionReason::OverEntryCap
        } else {
            EvictionReason::OverByteCap
        };
        total_bytes = total_bytes.saturating_sub(entry.size);
        remaining -= 1;
        plan.planned.push(PlannedEviction {
            url,
            entry,
            reason,
        });
    }

    plan.survivors = survivors.collect();
    plan.total_bytes_after = total_bytes;
    plan
}
