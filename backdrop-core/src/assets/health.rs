use backdrop_model::{AssetRecord, HealthCheckCandidate};

/// Storage key (device-local area) holding the last health-check run time.
pub const HEALTH_CHECK_LAST_RUN_KEY: &str = "backdrop.assets.healthCheck.lastRun";

pub fn is_due(last_run_ms: Option<u64>, now_ms: u64, interval_ms: u64) -> bool {
    match last_run_ms {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= interval_ms,
    }
}

/// Oldest-accessed records first; records already flagged are skipped.
pub fn select_candidates(
    records: &[AssetRecord],
    batch: usize,
) -> Vec<HealthCheckCandidate> {
    records
        .iter()
        .filter(|r| !r.is_invalid() && !r.is_empty())
        .take(batch)
        .map(|r| HealthCheckCandidate {
            id: r.id.clone(),
            source_url: r.source_url.clone(),
        })
        .collect()
}
