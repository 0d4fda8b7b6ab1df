use dashmap::DashSet;
use once_cell::sync::Lazy;

// Guard to avoid flooding logs: record a small set of keys we've already logged.
// Keys are formed as "kind:subject" where kind is one of
//   - fetch-fail
//   - crop-fallback
//   - transition-soft
//   - asset-degraded
static LOGGED_KEYS: Lazy<DashSet<String>> = Lazy::new(DashSet::new);

/// Upper bound on remembered keys; past it the set is reset.
const MAX_REMEMBERED: usize = 512;

fn first_time(kind: &str, subject: &str) -> bool {
    if LOGGED_KEYS.len() >= MAX_REMEMBERED {
        LOGGED_KEYS.clear();
    }
    LOGGED_KEYS.insert(format!("{kind}:{subject}"))
}

/// Log a fetch failure exactly once per URL.
pub fn log_fetch_failure_once(url: &str, error: &dyn std::fmt::Display) {
    if first_time("fetch-fail", url) {
        tracing::warn!(url, error = %error, "background fetch failed");
    }
}

/// Log a crop fallback exactly once per (url, aspect bucket).
pub fn log_crop_fallback_once(url: &str, bucket: u32, reason: &dyn std::fmt::Display) {
    if first_time("crop-fallback", &format!("{url}@{bucket}")) {
        tracing::info!(url, bucket, reason = %reason, "smart crop fell back to center");
    }
}

/// Log a full-resolution failure that left the preview on screen.
pub fn log_soft_failure_once(url: &str, error: &dyn std::fmt::Display) {
    if first_time("transition-soft", url) {
        tracing::warn!(
            url,
            error = %error,
            "full-resolution stage failed; keeping preview layer"
        );
    }
}

/// Log entry into degraded mode once per operation name.
pub fn log_degraded_once(operation: &str) {
    if first_time("asset-degraded", operation) {
        tracing::warn!(
            operation,
            "asset store degraded; returning safe defaults"
        );
    }
}

/// Forget a key so a recovered subject logs again on its next failure.
pub fn forget(kind: &str, subject: &str) {
    LOGGED_KEYS.remove(&format!("{kind}:{subject}"));
}
