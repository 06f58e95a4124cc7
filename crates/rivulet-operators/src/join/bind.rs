//! Bind join: for each left row, open a right iterator parameterized by that
//! row and combine what it yields according to a [`BindType`].
//!
//! | bind type  | right yields rows                    | right exhausted         |
//! |------------|--------------------------------------|-------------------------|
//! | JOIN       | merge each left x right row          | advance left            |
//! | LEFT_JOIN  | merge each left x right row, matched | pad left row if unmatched |
//! | EXISTS     | copy left row, close right           | advance, no output      |
//! | NOT_EXISTS | close right, no output               | copy left row           |
//! | MINUS      | close right, no output               | copy left row           |

use std::sync::Arc;
use std::time::Instant;

use rivulet_core::prelude::{Batch, BatchBinding, Error, IterId, Merger, Result, Timing, Vars};

use super::BindType;
use crate::metrics::{JoinMetrics, NoopMetrics};
use crate::traits::{BatchIt, BoxedBatchIt, CancelHandle, Pacing, Termination};

/// Opens the right-hand side for one left row.
pub trait Binder: Send {
    /// Schema every bound iterator produces.
    fn right_vars(&self) -> &Vars;

    fn bind(&mut self, row: &BatchBinding<'_>) -> Result<BoxedBatchIt>;
}

/// [`Binder`] backed by a closure.
pub struct FnBinder<F> {
    vars: Vars,
    f: F,
}

impl<F> FnBinder<F>
where
    F: FnMut(&BatchBinding<'_>) -> Result<BoxedBatchIt> + Send,
{
    pub fn new(vars: Vars, f: F) -> Self {
        Self { vars, f }
    }
}

impl<F> Binder for FnBinder<F>
where
    F: FnMut(&BatchBinding<'_>) -> Result<BoxedBatchIt> + Send,
{
    fn right_vars(&self) -> &Vars {
        &self.vars
    }

    fn bind(&mut self, row: &BatchBinding<'_>) -> Result<BoxedBatchIt> {
        (self.f)(row)
    }
}

pub struct BindBatchIt<B> {
    id: IterId,
    bind_type: BindType,
    left: BoxedBatchIt,
    binder: B,
    vars: Vars,
    // left x right -> out, for JOIN and LEFT_JOIN
    merger: Merger,
    // left -> out, for rows that carry left values only
    copier: Merger,
    // MINUS against a right side sharing no variable removes nothing
    disjoint_minus: bool,

    left_batch: Option<Batch>,
    next_row: usize,
    current_row: usize,
    left_done: bool,

    right: Option<BoxedBatchIt>,
    right_batch: Option<Batch>,
    right_row: usize,
    right_spare: Option<Batch>,
    matched: bool,
    // recycled output, refilled by the next pull
    out_spare: Option<Batch>,

    pacing: Pacing,
    termination: Termination,
    cancelled: bool,
    metrics: Arc<dyn JoinMetrics>,
}

impl<F> BindBatchIt<FnBinder<F>>
where
    F: FnMut(&BatchBinding<'_>) -> Result<BoxedBatchIt> + Send,
{
    /// Bind with a closure producing right iterators of schema `right_vars`.
    pub fn from_fn(left: BoxedBatchIt, bind_type: BindType, right_vars: Vars, f: F) -> Self {
        Self::new(left, bind_type, FnBinder::new(right_vars, f))
    }
}

impl<B: Binder> BindBatchIt<B> {
    pub fn new(left: BoxedBatchIt, bind_type: BindType, binder: B) -> Self {
        let vars = bind_type.out_vars(left.vars(), binder.right_vars());
        Self::with_projection(left, bind_type, binder, vars)
    }

    /// Like [`BindBatchIt::new`], narrowing the output to `out`.
    pub fn with_projection(left: BoxedBatchIt, bind_type: BindType, binder: B, out: Vars) -> Self {
        let merger = Merger::for_merge(left.vars(), binder.right_vars(), &out);
        let copier = Merger::projection(left.vars(), &out);
        let disjoint_minus =
            bind_type == BindType::Minus && !left.vars().intersects(binder.right_vars());
        Self {
            id: IterId::next(),
            bind_type,
            left,
            binder,
            vars: out,
            merger,
            copier,
            disjoint_minus,
            left_batch: None,
            next_row: 0,
            current_row: 0,
            left_done: false,
            right: None,
            right_batch: None,
            right_row: 0,
            right_spare: None,
            matched: false,
            out_spare: None,
            pacing: Pacing::default(),
            termination: Termination::new(),
            cancelled: false,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn JoinMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn bind_type(&self) -> BindType {
        self.bind_type
    }

    /// Whether a right iterator is currently open.
    pub fn has_open_right(&self) -> bool {
        self.right.is_some()
    }

    /// Move to the next left row, pulling a new left batch when needed.
    /// Returns `false` once the left side is exhausted.
    fn advance_left(&mut self) -> Result<bool> {
        loop {
            if let Some(lb) = &self.left_batch {
                if self.next_row < lb.rows() {
                    self.current_row = self.next_row;
                    self.next_row += 1;
                    return Ok(true);
                }
            }
            if self.left_done {
                return Ok(false);
            }
            let spent = self.left_batch.take();
            match self.left.next_batch(spent)? {
                Some(b) => {
                    self.metrics.left_rows(self.id, b.rows());
                    self.left_batch = Some(b);
                    self.next_row = 0;
                }
                None => {
                    self.left_done = true;
                    return Ok(false);
                }
            }
        }
    }

    fn open_right(&mut self) -> Result<()> {
        let Some(lb) = &self.left_batch else {
            return Err(Error::Invariant("bind opened without a left row".into()));
        };
        let binding = BatchBinding::new(self.left.vars(), lb, self.current_row);
        let mut right = self.binder.bind(&binding)?;
        right.set_timing(self.pacing.timing);
        self.right = Some(right);
        self.matched = false;
        Ok(())
    }

    fn close_right(&mut self) {
        if let Some(mut right) = self.right.take() {
            if let Some(b) = self.right_batch.take() {
                if self.right_spare.is_none() {
                    self.right_spare = Some(b);
                }
            }
            right.close();
        }
    }

    /// Append the current left row, left values only.
    fn copy_left(&self, out: &mut Batch) {
        if let Some(lb) = &self.left_batch {
            self.copier.merge_left_only(out, lb, self.current_row);
        }
    }

    /// Merge buffered right rows with the current left row until `max` rows.
    fn emit_matches(&mut self, out: &mut Batch, max: usize) {
        let (Some(lb), Some(rb)) = (&self.left_batch, &self.right_batch) else {
            return;
        };
        while self.right_row < rb.rows() && out.rows() < max {
            self.merger
                .merge_row(out, lb, self.current_row, rb, self.right_row);
            self.right_row += 1;
            self.matched = true;
        }
    }

    /// One step of the join loop. Returns `false` when the left side is done.
    fn step(&mut self, out: &mut Batch, max: usize) -> Result<bool> {
        if let Some(rb) = &self.right_batch {
            if self.right_row < rb.rows() {
                self.emit_matches(out, max);
                return Ok(true);
            }
            self.right_spare = self.right_batch.take();
        }

        if self.right.is_none() {
            if !self.advance_left()? {
                return Ok(false);
            }
            if self.disjoint_minus {
                self.copy_left(out);
                return Ok(true);
            }
            self.open_right()?;
        }

        let spare = self.right_spare.take();
        let pulled = match self.right.as_mut() {
            Some(right) => right.next_batch(spare)?,
            None => return Ok(true),
        };
        match pulled {
            Some(rb) => {
                self.metrics.right_rows(self.id, rb.rows());
                match self.bind_type {
                    BindType::Join | BindType::LeftJoin => {
                        self.right_batch = Some(rb);
                        self.right_row = 0;
                        self.emit_matches(out, max);
                    }
                    BindType::Exists => {
                        self.copy_left(out);
                        self.right_spare = Some(rb);
                        self.close_right();
                    }
                    BindType::NotExists | BindType::Minus => {
                        self.right_spare = Some(rb);
                        self.close_right();
                    }
                }
            }
            None => {
                self.close_right();
                match self.bind_type {
                    BindType::LeftJoin if !self.matched => {
                        if let Some(lb) = &self.left_batch {
                            self.merger.merge_left_only(out, lb, self.current_row);
                        }
                    }
                    BindType::NotExists | BindType::Minus => self.copy_left(out),
                    BindType::Join | BindType::LeftJoin | BindType::Exists => {}
                }
            }
        }
        Ok(true)
    }

    fn cleanup(&mut self, cause: Option<&Error>) {
        if !self.termination.begin() {
            return;
        }
        self.left_batch = None;
        self.close_right();
        self.right_spare = None;
        self.out_spare = None;
        self.left.close();
        self.metrics.completed(self.id, self.bind_type, cause);
        tracing::debug!(
            id = %self.id,
            bind = %self.bind_type,
            failed = cause.is_some_and(|e| !e.is_cancellation()),
            "bind terminated"
        );
    }
}

impl<B: Binder> BatchIt for BindBatchIt<B> {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.termination.is_done() {
            if std::mem::take(&mut self.cancelled) {
                return Err(Error::Cancelled);
            }
            return Ok(None);
        }
        let timing = self.pacing.effective();
        let mut out = reusable
            .or_else(|| self.out_spare.take())
            .unwrap_or_default();
        out.clear(self.vars.len());
        let fill_start = Instant::now();
        loop {
            if out.rows() >= timing.max_batch
                || (!out.is_empty() && timing.ready_in_nanos(out.rows(), fill_start) == 0)
            {
                break;
            }
            match self.step(&mut out, timing.max_batch) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    self.cleanup(Some(&e));
                    return Err(e);
                }
            }
        }
        if out.is_empty() {
            self.cleanup(None);
            return Ok(None);
        }
        self.pacing.delivered();
        Ok(Some(out))
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        if self.termination.is_done() || self.out_spare.is_some() {
            return Some(batch);
        }
        self.out_spare = Some(batch);
        None
    }

    fn timing(&self) -> Timing {
        self.pacing.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        self.left.set_timing(timing);
        if let Some(right) = self.right.as_mut() {
            right.set_timing(timing);
        }
        self.pacing.timing = timing;
    }

    fn temp_eager(&mut self) {
        self.left.temp_eager();
        if let Some(right) = self.right.as_mut() {
            right.temp_eager();
        }
        self.pacing.eager = true;
    }

    fn try_cancel(&mut self) -> bool {
        if self.termination.is_done() {
            return false;
        }
        if let Some(right) = self.right.as_mut() {
            right.try_cancel();
        }
        self.left.try_cancel();
        self.cleanup(Some(&Error::Cancelled));
        self.cancelled = true;
        true
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        // right sides come and go with left rows; only the left is stable
        self.left.cancel_handle()
    }

    fn close(&mut self) {
        self.cancelled = false;
        self.cleanup(None);
    }

    fn name(&self) -> &'static str {
        "bind"
    }
}
