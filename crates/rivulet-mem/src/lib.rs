#![forbid(unsafe_code)]
//! rivulet-mem: typed batch pool.
//!
//! Batches are large, short-lived, and shaped alike, so the engine recycles
//! them instead of reallocating. Recycling is move-based: a batch offered to
//! the pool is owned by the pool until someone takes it back out.

pub mod pool;
pub mod tracking;

pub use pool::{default_pool, BatchPool};
pub use tracking::PoolStats;
