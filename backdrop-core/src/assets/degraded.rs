use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{error::Result, log_once};

/// Circuit breaker in front of the asset database.
///
/// After `threshold` consecutive failures every call returns its safe default
/// without running the operation. Once `cooldown` has passed a single trial
/// call is let through; its success closes the breaker again.
#[derive(Debug)]
pub(crate) struct DegradedGuard {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    tripped_at: Mutex<Option<Instant>>,
}

impl DegradedGuard {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            tripped_at: Mutex::new(None),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.tripped_at.lock().is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.tripped_at.lock() = None;
    }

    /// Run `op` unless the breaker is open; map any failure to `default`.
    pub async fn run<T, F, Fut>(&self, name: &'static str, default: T, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.admit() {
            log_once::log_degraded_once(name);
            return default;
        }
        match op().await {
            Ok(value) => {
                self.on_success(name);
                value
            }
            Err(err) => {
                self.on_failure(name, &err);
                default
            }
        }
    }

    fn admit(&self) -> bool {
        let mut tripped_at = self.tripped_at.lock();
        match *tripped_at {
            None => true,
            Some(at) if at.elapsed() >= self.cooldown => {
                // Re-arm the window so only this caller retries.
                *tripped_at = Some(Instant::now());
                true
            }
            Some(_) => false,
        }
    }

    fn on_success(&self, name: &'static str) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let recovered = self.tripped_at.lock().take().is_some();
        if recovered {
            log_once::forget("asset-degraded", name);
            tracing::info!(operation = name, "asset store recovered from degraded mode");
        }
    }

    fn on_failure(&self, name: &'static str, err: &crate::BackdropError) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(operation = name, failures, error = %err, "asset store operation failed");
        if failures >= self.threshold {
            let mut tripped_at = self.tripped_at.lock();
            if tripped_at.is_none() {
                tracing::warn!(
                    failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "asset store entering degraded mode"
                );
            }
            *tripped_at = Some(Instant::now());
        }
    }
}
