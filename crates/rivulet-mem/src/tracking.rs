//! Pool usage counters: hits, misses, rejected offers and the peak free-list
//! size. All relaxed atomics; read them for diagnostics only.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Default)]
pub struct PoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    rejected: AtomicU64,
    peak_pooled: AtomicUsize,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new pooled count; updates peak if higher.
    pub(crate) fn record_pooled(&self, pooled: usize) {
        let mut cur = self.peak_pooled.load(Ordering::Relaxed);
        while pooled > cur {
            match self.peak_pooled.compare_exchange(
                cur,
                pooled,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(
            pooled,
            peak = self.peak_pooled.load(Ordering::Relaxed),
            "batch pool size"
        );
    }

    /// `get` calls served from the free-list.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// `get` calls that had to allocate.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// `offer` calls refused because the pool was full.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> usize {
        self.peak_pooled.load(Ordering::Relaxed)
    }
}
