#![forbid(unsafe_code)]
//! rivulet-exec: drive operator trees to completion and summarize the run.
//!
//! The engine is thin: operators own their threads and queues,
//! the engine only configures the root, pulls, recycles, and keeps counts.

pub mod runtime;
pub mod summary;

pub use runtime::{collect_rows, Engine, ExecError};
pub use summary::{Outcome, RunId, RunSummary};
