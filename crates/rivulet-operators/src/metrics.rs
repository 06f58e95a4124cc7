//! Join metrics hooks.
//!
//! Bind operators report the rows they receive and their completion here.
//! The default is a no-op; wire a real collector in the embedding layer.

use std::sync::atomic::{AtomicU64, Ordering};

use rivulet_core::prelude::{Error, IterId};

use crate::join::BindType;

pub trait JoinMetrics: Send + Sync {
    /// A left batch with `rows` rows was pulled.
    fn left_rows(&self, _id: IterId, _rows: usize) {}

    /// A right batch with `rows` rows was pulled.
    fn right_rows(&self, _id: IterId, _rows: usize) {}

    /// The join terminated; `cause` is `None` on exhaustion.
    fn completed(&self, _id: IterId, _bind: BindType, _cause: Option<&Error>) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl JoinMetrics for NoopMetrics {}

/// Atomic counters, handy in tests and for cheap in-process stats.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    left_rows: AtomicU64,
    right_rows: AtomicU64,
    completions: AtomicU64,
    failures: AtomicU64,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn left(&self) -> u64 {
        self.left_rows.load(Ordering::Relaxed)
    }

    pub fn right(&self) -> u64 {
        self.right_rows.load(Ordering::Relaxed)
    }

    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl JoinMetrics for CountingMetrics {
    fn left_rows(&self, _id: IterId, rows: usize) {
        self.left_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    fn right_rows(&self, _id: IterId, rows: usize) {
        self.right_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    fn completed(&self, _id: IterId, _bind: BindType, cause: Option<&Error>) {
        self.completions.fetch_add(1, Ordering::Relaxed);
        if cause.is_some_and(|e| !e.is_cancellation()) {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Emits every hook as a `tracing` event under the `rivulet::join` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingJoinMetrics;

impl JoinMetrics for TracingJoinMetrics {
    fn left_rows(&self, id: IterId, rows: usize) {
        emit("left_rows", &[("id", id.to_string()), ("rows", rows.to_string())]);
    }

    fn right_rows(&self, id: IterId, rows: usize) {
        emit("right_rows", &[("id", id.to_string()), ("rows", rows.to_string())]);
    }

    fn completed(&self, id: IterId, bind: BindType, cause: Option<&Error>) {
        let cause = cause.map_or_else(|| "none".to_string(), ToString::to_string);
        emit(
            "completed",
            &[("id", id.to_string()), ("bind", bind.to_string()), ("cause", cause)],
        );
    }
}

fn emit(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::TRACE, "rivulet::join", event);
    let _enter = span.enter();
    for (k, v) in key_values {
        tracing::trace!(target: "rivulet::join", %event, %k, %v, "metric");
    }
}
