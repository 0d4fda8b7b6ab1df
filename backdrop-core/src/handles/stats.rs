use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleStatsSnapshot {
    pub live_handles: u64,
    pub live_bytes: u64,
    pub created: u64,
    pub retained: u64,
    pub freed: u64,
    pub swept: u64,
}

#[derive(Debug, Default)]
pub(crate) struct HandleStats {
    created: AtomicU64,
    retained: AtomicU64,
    freed: AtomicU64,
    swept: AtomicU64,
    live_bytes: AtomicU64,
}

impl HandleStats {
    pub fn on_created(&self, bytes: u64) {
        self.created.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn on_retained(&self) {
        self.retained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_freed(&self, bytes: u64, swept: bool) {
        self.freed.fetch_add(1, Ordering::Relaxed);
        if swept {
            self.swept.fetch_add(1, Ordering::Relaxed);
        }
        let mut current = self.live_bytes.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.live_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn snapshot(&self, live_handles: usize) -> HandleStatsSnapshot {
        HandleStatsSnapshot {
            live_handles: live_handles as u64,
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}
