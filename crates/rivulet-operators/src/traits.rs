//! The batch iterator contract every operator implements and consumes.
//!
//! Operators form trees. Each node pulls from its upstream(s) with the same
//! contract it exposes downstream:
//! 1. configure with `set_timing` (or the fluent `BatchItExt` setters),
//! 2. loop on `next_batch` until `Ok(None)` or an error,
//! 3. `close` (always safe, also after exhaustion or cancellation).
//!
//! # Ownership
//!
//! `next_batch` hands the returned batch to the caller. The caller may give it
//! back through `recycle` or as the `reusable` argument of the next pull, which
//! lets producers refill the same allocation. An operator that cannot use a
//! recycled batch returns it, and the caller just drops it.
//!
//! # Cancelling from another thread
//!
//! `try_cancel` needs `&mut self`, which a thread blocked in `next_batch`
//! holds. Iterators that can block expose a [`CancelHandle`] instead; merge
//! and scatter fire it to unblock the sources their workers own.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rivulet_core::prelude::{Batch, Cell, Result, Timing, Vars};

pub trait BatchIt: Send {
    /// Output schema, fixed at construction.
    fn vars(&self) -> &Vars;

    /// Pull the next non-empty batch. `Ok(None)` signals exhaustion.
    ///
    /// After `Ok(None)` or an error the iterator is terminated: its cleanup
    /// already ran (exactly once) and further calls return `Ok(None)`.
    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>>;

    /// Offer a consumed batch back. Returns it when ownership was not taken.
    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        Some(batch)
    }

    fn timing(&self) -> Timing;

    /// Forward to upstream(s) first, then apply locally.
    fn set_timing(&mut self, timing: Timing);

    /// Publish the next batch as soon as it has a row, then fall back to the
    /// configured timing. Forwarded to upstream(s).
    fn temp_eager(&mut self);

    /// Cooperative cancellation. Returns `true` only when this call took
    /// effect; repeated calls are no-ops.
    fn try_cancel(&mut self) -> bool;

    /// Cancellation callable while another thread is inside `next_batch`.
    /// `None` for iterators that never block on other threads.
    fn cancel_handle(&self) -> Option<CancelHandle> {
        None
    }

    /// Release upstreams, worker threads, and buffered batches. Idempotent.
    fn close(&mut self);

    /// Human-readable operator name (stable), used in logs and metrics.
    fn name(&self) -> &'static str {
        "batch_it"
    }
}

/// Boxed iterator for dynamic dispatch across operator trees.
pub type BoxedBatchIt = Box<dyn BatchIt>;

impl<T: BatchIt + ?Sized> BatchIt for Box<T> {
    fn vars(&self) -> &Vars {
        (**self).vars()
    }
    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        (**self).next_batch(reusable)
    }
    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        (**self).recycle(batch)
    }
    fn timing(&self) -> Timing {
        (**self).timing()
    }
    fn set_timing(&mut self, timing: Timing) {
        (**self).set_timing(timing)
    }
    fn temp_eager(&mut self) {
        (**self).temp_eager()
    }
    fn try_cancel(&mut self) -> bool {
        (**self).try_cancel()
    }
    fn cancel_handle(&self) -> Option<CancelHandle> {
        (**self).cancel_handle()
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Thread-safe cancellation trigger for an iterator owned elsewhere.
///
/// Firing it makes a pending or later `next_batch` of the target return
/// `Err(Cancelled)`. Returns `true` when this call took effect.
#[derive(Clone)]
pub struct CancelHandle(Arc<dyn Fn() -> bool + Send + Sync>);

impl CancelHandle {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn cancel(&self) -> bool {
        (self.0)()
    }

    /// One handle firing every handle in `handles`; `None` when empty.
    pub fn all(handles: Vec<CancelHandle>) -> Option<Self> {
        match handles.len() {
            0 => None,
            1 => handles.into_iter().next(),
            _ => Some(Self::new(move || {
                handles.iter().fold(false, |hit, h| h.cancel() | hit)
            })),
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// Fluent configuration and row-at-a-time access for any iterator.
pub trait BatchItExt: BatchIt {
    fn min_batch(&mut self, rows: usize) -> &mut Self {
        let t = self.timing().with_min_batch(rows);
        self.set_timing(t);
        self
    }

    fn max_batch(&mut self, rows: usize) -> &mut Self {
        let t = self.timing().with_max_batch(rows);
        self.set_timing(t);
        self
    }

    fn min_wait(&mut self, wait: Duration) -> &mut Self {
        let t = self.timing().with_min_wait(wait);
        self.set_timing(t);
        self
    }

    fn max_wait(&mut self, wait: Duration) -> &mut Self {
        let t = self.timing().with_max_wait(wait);
        self.set_timing(t);
        self
    }

    fn eager_once(&mut self) -> &mut Self {
        self.temp_eager();
        self
    }

    /// Row-at-a-time view over this iterator.
    fn rows(&mut self) -> Rows<'_, Self> {
        Rows {
            it: self,
            current: None,
            row: 0,
            done: false,
        }
    }
}

impl<T: BatchIt + ?Sized> BatchItExt for T {}

/// `has_next`/`next` view over a batch iterator.
///
/// An upstream error is yielded once as `Some(Err(_))`; iteration ends after it.
pub struct Rows<'a, I: BatchIt + ?Sized> {
    it: &'a mut I,
    current: Option<Batch>,
    row: usize,
    done: bool,
}

impl<I: BatchIt + ?Sized> Rows<'_, I> {
    pub fn has_next(&mut self) -> Result<bool> {
        loop {
            if let Some(b) = &self.current {
                if self.row < b.rows() {
                    return Ok(true);
                }
            }
            if self.done {
                return Ok(false);
            }
            let spent = self.current.take();
            self.row = 0;
            match self.it.next_batch(spent) {
                Ok(Some(b)) => self.current = Some(b),
                Ok(None) => {
                    self.done = true;
                    return Ok(false);
                }
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
    }
}

impl<I: BatchIt + ?Sized> Iterator for Rows<'_, I> {
    type Item = Result<Vec<Cell>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => {
                let b = self.current.as_ref()?;
                let row = b.row(self.row).to_vec();
                self.row += 1;
                Some(Ok(row))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Run-once guard for terminal cleanup, safe under concurrent error and
/// close paths.
#[derive(Debug, Default)]
pub struct Termination {
    done: AtomicBool,
}

impl Termination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for exactly one caller.
    pub fn begin(&self) -> bool {
        !self.done.swap(true, Ordering::AcqRel)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Configured timing plus the one-shot eager request.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub timing: Timing,
    pub eager: bool,
}

impl Pacing {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            eager: false,
        }
    }

    /// Timing to apply to the batch being built right now.
    pub fn effective(&self) -> Timing {
        if self.eager {
            self.timing.eager()
        } else {
            self.timing
        }
    }

    /// Called after a batch was handed downstream.
    pub fn delivered(&mut self) {
        self.eager = false;
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(Timing::default())
    }
}
