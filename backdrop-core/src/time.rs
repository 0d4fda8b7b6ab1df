use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

pub fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Wall-clock source in unix milliseconds.
///
/// Persisted timestamps (cache entries, asset records, the current
/// background) are read through this so tests can move time explicitly.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> u64 + Send + Sync>);

impl Clock {
    pub fn system() -> Self {
        Self(Arc::new(unix_ms_now))
    }

    pub fn from_fn(f: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A clock that only moves when the returned cell is written.
    pub fn manual(start_ms: u64) -> (Self, Arc<AtomicU64>) {
        let cell = Arc::new(AtomicU64::new(start_ms));
        let reader = Arc::clone(&cell);
        (
            Self::from_fn(move || reader.load(Ordering::SeqCst)),
            cell,
        )
    }

    pub fn now_ms(&self) -> u64 {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").field(&self.now_ms()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Clock;
    use std::sync::atomic::Ordering;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let (clock, cell) = Clock::manual(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        cell.fetch_add(500, Ordering::SeqCst);
        assert_eq!(clock.now_ms(), 1_500);
    }
}
