//! Bounded free-list of batches.
//!
//! `offer` moves a batch in; `get` moves one out (or allocates). Offering to a
//! full pool is a legal no-op: the batch is handed back to the caller, who
//! simply drops it.

use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rivulet_core::config::EngineConfig;
use rivulet_core::types::Batch;

use crate::tracking::PoolStats;

static DEFAULT_POOL: Lazy<BatchPool> =
    Lazy::new(|| BatchPool::new(EngineConfig::global().pool_capacity));

/// Process-wide pool sized by `EngineConfig::global().pool_capacity`.
pub fn default_pool() -> &'static BatchPool {
    &DEFAULT_POOL
}

pub struct BatchPool {
    capacity: usize,
    free: Mutex<Vec<Batch>>,
    stats: PoolStats,
}

impl BatchPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity.min(1024))),
            stats: PoolStats::new(),
        }
    }

    /// Take a cleared batch shaped for `cols` columns, allocating on a miss.
    pub fn get(&self, cols: usize) -> Batch {
        let pooled = self.lock().pop();
        match pooled {
            Some(mut b) => {
                self.stats.record_hit();
                b.clear(cols);
                b
            }
            None => {
                self.stats.record_miss();
                Batch::new(cols)
            }
        }
    }

    /// Offer `batch` for reuse. Returns it back when the pool is full.
    pub fn offer(&self, batch: Batch) -> Option<Batch> {
        let mut free = self.lock();
        if free.len() >= self.capacity {
            drop(free);
            self.stats.record_rejected();
            return Some(batch);
        }
        free.push(batch);
        let len = free.len();
        drop(free);
        self.stats.record_pooled(len);
        None
    }

    /// Batches currently pooled.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Drop every pooled batch.
    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock cannot leave the Vec half-edited, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Vec<Batch>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for BatchPool {
    fn default() -> Self {
        Self::new(EngineConfig::global().pool_capacity)
    }
}
