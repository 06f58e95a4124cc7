//! Batch timing parameters.
//!
//! A producer keeps filling a batch until `ready_in_nanos` says it should be
//! published. Small batches amortize nothing; large ones add latency. The four
//! knobs below bound both.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Rows below which a batch should keep filling (until `max_wait`).
    pub min_batch: usize,
    /// Hard cap on rows per batch.
    pub max_batch: usize,
    /// Delay allowed once `min_batch` rows are present.
    pub min_wait: Duration,
    /// Delay allowed while fewer than `min_batch` rows are present.
    pub max_wait: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        EngineConfig::global().timing()
    }
}

impl Timing {
    /// Publish every non-empty batch immediately.
    pub const EAGER: Timing = Timing {
        min_batch: 1,
        max_batch: usize::MAX,
        min_wait: Duration::ZERO,
        max_wait: Duration::ZERO,
    };

    pub fn new(min_batch: usize, max_batch: usize, min_wait: Duration, max_wait: Duration) -> Self {
        let mut t = Timing {
            min_batch,
            max_batch,
            min_wait,
            max_wait,
        };
        t.normalize();
        t
    }

    /// Nanoseconds until a batch with `rows` rows whose filling started at
    /// `fill_start` should be published. Zero means publish now.
    pub fn ready_in_nanos(&self, rows: usize, fill_start: Instant) -> u64 {
        if rows == 0 {
            return u64::MAX;
        }
        if rows >= self.max_batch {
            return 0;
        }
        let wait = if rows < self.min_batch {
            self.max_wait
        } else {
            self.min_wait
        };
        if wait.is_zero() {
            return 0;
        }
        let left = wait.saturating_sub(fill_start.elapsed());
        u64::try_from(left.as_nanos()).unwrap_or(u64::MAX)
    }

    pub fn is_ready(&self, rows: usize, fill_start: Instant) -> bool {
        self.ready_in_nanos(rows, fill_start) == 0
    }

    /// Same batch cap, but publish as soon as there is one row.
    pub fn eager(&self) -> Timing {
        Timing {
            min_batch: 1,
            max_batch: self.max_batch,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    pub fn with_min_batch(mut self, rows: usize) -> Self {
        self.min_batch = rows;
        self.normalize();
        self
    }

    pub fn with_max_batch(mut self, rows: usize) -> Self {
        self.max_batch = rows;
        if self.min_batch > self.max_batch {
            self.min_batch = self.max_batch;
        }
        self.normalize();
        self
    }

    pub fn with_min_wait(mut self, wait: Duration) -> Self {
        self.min_wait = wait;
        self.normalize();
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        if self.min_wait > self.max_wait {
            self.min_wait = self.max_wait;
        }
        self.normalize();
        self
    }

    // Clamp instead of failing: setters are called from fluent chains.
    fn normalize(&mut self) {
        self.min_batch = self.min_batch.max(1);
        self.max_batch = self.max_batch.max(self.min_batch);
        self.max_wait = self.max_wait.max(self.min_wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(min: usize, max: usize, min_wait_ms: u64, max_wait_ms: u64) -> Timing {
        Timing::new(
            min,
            max,
            Duration::from_millis(min_wait_ms),
            Duration::from_millis(max_wait_ms),
        )
    }

    #[test]
    fn empty_batch_is_never_ready() {
        let t = timing(1, 8, 0, 0);
        assert_eq!(t.ready_in_nanos(0, Instant::now()), u64::MAX);
    }

    #[test]
    fn full_batch_is_ready_regardless_of_waits() {
        let t = timing(4, 8, 1_000, 10_000);
        assert_eq!(t.ready_in_nanos(8, Instant::now()), 0);
        assert_eq!(t.ready_in_nanos(9, Instant::now()), 0);
    }

    #[test]
    fn small_batch_waits_max_wait() {
        let t = timing(4, 8, 10, 10_000);
        let now = Instant::now();
        assert!(t.ready_in_nanos(2, now) > Duration::from_millis(5_000).as_nanos() as u64);
        // above min_batch only min_wait applies
        assert!(t.ready_in_nanos(5, now) <= Duration::from_millis(10).as_nanos() as u64);
    }

    #[test]
    fn elapsed_wait_means_ready() {
        let t = timing(4, 8, 0, 1);
        let start = Instant::now() - Duration::from_millis(5);
        assert_eq!(t.ready_in_nanos(1, start), 0);
    }

    #[test]
    fn setters_clamp() {
        let t = timing(4, 8, 0, 0).with_max_batch(2);
        assert_eq!((t.min_batch, t.max_batch), (2, 2));
        let t = t.with_min_batch(0);
        assert_eq!(t.min_batch, 1);
        let t = t.with_min_wait(Duration::from_millis(3));
        assert_eq!(t.max_wait, Duration::from_millis(3));
        assert_eq!(Timing::EAGER.eager(), Timing::EAGER);
    }
}
