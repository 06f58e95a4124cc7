//! Runtime: drain an operator tree under an `EngineConfig`.
//!
//! Behavior:
//! - Applies the configured `Timing` to the root (which forwards it upstream).
//! - Pulls until exhaustion, handing each batch to a visitor and then back to
//!   the root as the next reusable buffer.
//! - Always closes the root, on success, failure, or row limit.
//! - Emits a `RunSummary` with counts and elapsed time.

use std::time::Instant;

use thiserror::Error;

use rivulet_core::config::EngineConfig;
use rivulet_core::prelude::{Batch, Cell, Error};
use rivulet_operators::traits::BatchIt;

use crate::summary::{Outcome, RunSummary};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("operator {op}: {source}")]
    Operator {
        op: &'static str,
        #[source]
        source: Error,
    },
    #[error("visitor: {0}")]
    Visitor(String),
    #[error("invalid config: {0}")]
    Config(String),
}

impl ExecError {
    /// The core error behind an operator failure.
    pub fn core(&self) -> Option<&Error> {
        match self {
            ExecError::Operator { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Engine owns the run configuration.
pub struct Engine {
    cfg: EngineConfig,
    row_limit: Option<u64>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            row_limit: None,
        }
    }

    /// Engine configured from `RIVULET_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    /// Stop (and cancel the root) once at least `rows` rows were pulled.
    pub fn with_row_limit(mut self, rows: u64) -> Self {
        self.row_limit = Some(rows);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Drain `root`, discarding the rows.
    pub fn run<I: BatchIt + ?Sized>(&self, root: &mut I) -> Result<RunSummary, ExecError> {
        self.run_with(root, |_| Ok(()))
    }

    /// Drain `root`, showing every batch to `visit` before recycling it.
    pub fn run_with<I, F>(&self, root: &mut I, mut visit: F) -> Result<RunSummary, ExecError>
    where
        I: BatchIt + ?Sized,
        F: FnMut(&Batch) -> Result<(), ExecError>,
    {
        if self.cfg.max_batch == 0 {
            return Err(ExecError::Config("max_batch must be positive".into()));
        }
        let started = Instant::now();
        let mut summary = RunSummary::new(root.name());
        root.set_timing(self.cfg.timing());
        tracing::debug!(run = ?summary.id, root = root.name(), "run started");

        let mut reusable: Option<Batch> = None;
        let result = loop {
            let batch = match root.next_batch(reusable.take()) {
                Ok(Some(b)) => b,
                Ok(None) => break Ok(()),
                Err(e) if e.is_cancellation() => {
                    summary.outcome = Outcome::Cancelled;
                    break Ok(());
                }
                Err(e) => {
                    break Err(ExecError::Operator {
                        op: root.name(),
                        source: e,
                    })
                }
            };
            summary.record_batch(batch.rows());
            tracing::trace!(rows = batch.rows(), "run batch");
            if let Err(e) = visit(&batch) {
                break Err(e);
            }
            if self.row_limit.is_some_and(|limit| summary.rows >= limit) {
                root.try_cancel();
                summary.outcome = Outcome::Limited;
                break Ok(());
            }
            match root.recycle(batch) {
                None => summary.recycled += 1,
                Some(b) => reusable = Some(b),
            }
        };
        root.close();

        summary.elapsed_us = started.elapsed().as_micros() as u64;
        match result {
            Ok(()) => {
                tracing::debug!(
                    run = ?summary.id,
                    batches = summary.batches,
                    rows = summary.rows,
                    outcome = ?summary.outcome,
                    "run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::debug!(run = ?summary.id, error = %e, "run failed");
                Err(e)
            }
        }
    }

    /// Drain `root` and return every row.
    pub fn collect_rows<I: BatchIt + ?Sized>(&self, root: &mut I) -> Result<Vec<Vec<Cell>>, ExecError> {
        let mut rows = Vec::new();
        self.run_with(root, |b| {
            rows.extend(b.iter_rows().map(<[Cell]>::to_vec));
            Ok(())
        })?;
        Ok(rows)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::global().clone())
    }
}

/// Drain `root` with the process-wide configuration and return every row.
pub fn collect_rows<I: BatchIt + ?Sized>(root: &mut I) -> Result<Vec<Vec<Cell>>, ExecError> {
    Engine::default().collect_rows(root)
}
