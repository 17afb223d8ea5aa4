//! Process-wide monotonic counters.

use std::sync::atomic::{AtomicU64, Ordering};

static HITS: AtomicU64 = AtomicU64::new(0);
static MISSES: AtomicU64 = AtomicU64::new(0);
static EXPIRED: AtomicU64 = AtomicU64::new(0);
static EVICTED: AtomicU64 = AtomicU64::new(0);

/// Snapshot of the process-wide hit/miss/expired/evicted counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
}

pub(crate) fn record_hit() {
    HITS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_miss() {
    MISSES.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_expired(n: u64) {
    if n > 0 {
        EXPIRED.fetch_add(n, Ordering::Relaxed);
    }
}

pub(crate) fn record_evicted(n: u64) {
    if n > 0 {
        EVICTED.fetch_add(n, Ordering::Relaxed);
    }
}

/// Read the current counters without resetting them.
pub fn snapshot() -> Stats {
    Stats {
        hits: HITS.load(Ordering::Relaxed),
        misses: MISSES.load(Ordering::Relaxed),
        expired: EXPIRED.load(Ordering::Relaxed),
        evicted: EVICTED.load(Ordering::Relaxed),
    }
}

/// Reset every counter to zero, returning the values they held.
pub fn reset() -> Stats {
    let snap = Stats {
        hits: HITS.swap(0, Ordering::Relaxed),
        misses: MISSES.swap(0, Ordering::Relaxed),
        expired: EXPIRED.swap(0, Ordering::Relaxed),
        evicted: EVICTED.swap(0, Ordering::Relaxed),
    };
    tracing::debug!(?snap, "stats reset");
    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        reset();
        record_hit();
        record_hit();
        record_miss();
        record_expired(3);
        record_evicted(2);
        let snap = snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.expired, 3);
        assert_eq!(snap.evicted, 2);
        let reset_snap = reset();
        assert_eq!(reset_snap, snap);
        assert_eq!(snapshot(), Stats::default());
    }
}
