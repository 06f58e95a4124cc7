//! Engine configuration that downstream crates can serialize/deserialize.

use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::timing::Timing;

static GLOBAL: Lazy<EngineConfig> = Lazy::new(EngineConfig::from_env);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows below which producers keep filling a batch.
    pub min_batch: usize,

    /// Hard cap on rows per batch.
    pub max_batch: usize,

    /// Publish delay once `min_batch` rows are buffered (microseconds).
    pub min_wait_us: u64,

    /// Publish delay while fewer than `min_batch` rows are buffered (microseconds).
    pub max_wait_us: u64,

    /// Batches the default pool keeps for reuse.
    pub pool_capacity: usize,

    /// Prefix for worker thread names (merge sources, scatter drainers).
    pub thread_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_batch: 1,
            max_batch: 256,
            min_wait_us: 0,
            max_wait_us: 0,
            pool_capacity: 64,
            thread_prefix: "rivulet".to_string(),
        }
    }
}

impl EngineConfig {
    /// Process-wide configuration, read from the environment on first use.
    pub fn global() -> &'static EngineConfig {
        &GLOBAL
    }

    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `RIVULET_MIN_BATCH`: rows below which batches keep filling
    /// - `RIVULET_MAX_BATCH`: hard cap on rows per batch
    /// - `RIVULET_MIN_WAIT_US` / `RIVULET_MAX_WAIT_US`: publish delays
    /// - `RIVULET_POOL_CAPACITY`: batches kept by the default pool
    /// - `RIVULET_THREAD_PREFIX`: worker thread name prefix
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("RIVULET_MIN_BATCH") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.min_batch = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_MAX_BATCH") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_batch = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_MIN_WAIT_US") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.min_wait_us = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_MAX_WAIT_US") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_wait_us = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_POOL_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.pool_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_THREAD_PREFIX") {
            if !s.trim().is_empty() {
                cfg.thread_prefix = s;
            }
        }

        cfg
    }

    /// Parse a JSON config document, e.g. one embedded in a query request.
    pub fn from_json(s: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Timing every iterator starts with. Out-of-range values are clamped.
    pub fn timing(&self) -> Timing {
        Timing::new(
            self.min_batch,
            self.max_batch,
            Duration::from_micros(self.min_wait_us),
            Duration::from_micros(self.max_wait_us),
        )
    }

    /// Name for the `idx`-th worker of kind `role`.
    pub fn thread_name(&self, role: &str, idx: usize) -> String {
        format!("{}-{}-{}", self.thread_prefix, role, idx)
    }
}
