//! Leaf iterators: in-memory batches, empty and singleton sources, and a
//! source that fails after a prefix (fault injection).

use std::collections::VecDeque;
use std::sync::Arc;

use rivulet_core::prelude::{Batch, Cell, Error, Result, Timing, Vars};
use rivulet_mem::{default_pool, BatchPool};

use crate::traits::{BatchIt, Pacing};

/// Serves pre-built batches, splitting any batch larger than `max_batch`.
/// Recycled batches go to a `BatchPool`.
pub struct VecBatchIt {
    vars: Vars,
    pending: VecDeque<Batch>,
    pacing: Pacing,
    pool: Option<Arc<BatchPool>>,
    cancelled: bool,
    terminated: bool,
}

impl VecBatchIt {
    pub fn new(vars: Vars, batches: impl IntoIterator<Item = Batch>) -> Self {
        Self {
            vars,
            pending: batches.into_iter().filter(|b| b.rows() > 0).collect(),
            pacing: Pacing::default(),
            pool: None,
            cancelled: false,
            terminated: false,
        }
    }

    /// One batch holding `rows`.
    pub fn from_rows(vars: Vars, rows: impl IntoIterator<Item = Vec<Cell>>) -> Self {
        let batch = Batch::from_rows(vars.len(), rows);
        Self::new(vars, [batch])
    }

    /// Recycle into `pool` instead of the process-wide default pool.
    pub fn with_pool(mut self, pool: Arc<BatchPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Rows not yet handed out.
    pub fn remaining_rows(&self) -> usize {
        self.pending.iter().map(Batch::rows).sum()
    }

    fn pool(&self) -> &BatchPool {
        self.pool.as_deref().unwrap_or_else(|| default_pool())
    }

    fn split_front(&mut self, mut head: Batch, max: usize) -> Option<Batch> {
        let first = self.pending.pop_front()?;
        if first.rows() <= max {
            let _ = self.pool().offer(head);
            return Some(first);
        }
        head.clear(first.cols());
        let mut tail = self.pool().get(first.cols());
        for r in 0..first.rows() {
            if r < max {
                head.put_row(&first, r);
            } else {
                tail.put_row(&first, r);
            }
        }
        let _ = self.pool().offer(first);
        self.pending.push_front(tail);
        Some(head)
    }
}

impl BatchIt for VecBatchIt {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.terminated {
            return Ok(None);
        }
        if self.cancelled {
            self.terminated = true;
            return Err(Error::Cancelled);
        }
        let max = self.pacing.effective().max_batch;
        let head = reusable.unwrap_or_else(|| self.pool().get(self.vars.len()));
        match self.split_front(head, max) {
            Some(b) => {
                self.pacing.delivered();
                Ok(Some(b))
            }
            None => {
                self.terminated = true;
                Ok(None)
            }
        }
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        self.pool().offer(batch)
    }

    fn timing(&self) -> Timing {
        self.pacing.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        self.pacing.timing = timing;
    }

    fn temp_eager(&mut self) {
        self.pacing.eager = true;
    }

    fn try_cancel(&mut self) -> bool {
        if self.cancelled || self.terminated {
            return false;
        }
        self.cancelled = true;
        true
    }

    fn close(&mut self) {
        self.terminated = true;
        while let Some(b) = self.pending.pop_front() {
            if self.pool().offer(b).is_some() {
                break;
            }
        }
        self.pending.clear();
    }

    fn name(&self) -> &'static str {
        "vec"
    }
}

/// Produces nothing.
pub struct EmptyBatchIt {
    vars: Vars,
    timing: Timing,
}

impl EmptyBatchIt {
    pub fn new(vars: Vars) -> Self {
        Self {
            vars,
            timing: Timing::default(),
        }
    }
}

impl BatchIt for EmptyBatchIt {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, _reusable: Option<Batch>) -> Result<Option<Batch>> {
        Ok(None)
    }

    fn timing(&self) -> Timing {
        self.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    fn temp_eager(&mut self) {}

    fn try_cancel(&mut self) -> bool {
        false
    }

    fn close(&mut self) {}

    fn name(&self) -> &'static str {
        "empty"
    }
}

/// Yields one row with every var unbound: the identity of a join.
pub struct SingletonBatchIt {
    vars: Vars,
    timing: Timing,
    done: bool,
}

impl SingletonBatchIt {
    pub fn new(vars: Vars) -> Self {
        Self {
            vars,
            timing: Timing::default(),
            done: false,
        }
    }
}

impl BatchIt for SingletonBatchIt {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut b = reusable.unwrap_or_default();
        b.clear(self.vars.len());
        b.push_unbound_row();
        Ok(Some(b))
    }

    fn timing(&self) -> Timing {
        self.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    fn temp_eager(&mut self) {}

    fn try_cancel(&mut self) -> bool {
        !std::mem::replace(&mut self.done, true)
    }

    fn close(&mut self) {
        self.done = true;
    }

    fn name(&self) -> &'static str {
        "singleton"
    }
}

/// Serves its batches, then fails with `error`.
pub struct FailingBatchIt {
    inner: VecBatchIt,
    error: Option<Error>,
}

impl FailingBatchIt {
    pub fn new(vars: Vars, batches: impl IntoIterator<Item = Batch>, error: Error) -> Self {
        Self {
            inner: VecBatchIt::new(vars, batches),
            error: Some(error),
        }
    }
}

impl BatchIt for FailingBatchIt {
    fn vars(&self) -> &Vars {
        self.inner.vars()
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        match self.inner.next_batch(reusable)? {
            Some(b) => Ok(Some(b)),
            None => match self.error.take() {
                Some(e) => Err(e),
                None => Ok(None),
            },
        }
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        self.inner.recycle(batch)
    }

    fn timing(&self) -> Timing {
        self.inner.timing()
    }

    fn set_timing(&mut self, timing: Timing) {
        self.inner.set_timing(timing);
    }

    fn temp_eager(&mut self) {
        self.inner.temp_eager();
    }

    fn try_cancel(&mut self) -> bool {
        self.inner.try_cancel()
    }

    fn close(&mut self) {
        self.error = None;
        self.inner.close();
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
