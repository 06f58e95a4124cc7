//! Fan-in: drain N sources concurrently into one consumer-facing queue.
//!
//! One worker thread per source is spawned on the first pull. Workers feed a
//! shared [`BatchQueue`] that holds up to N ready batches, so a slow consumer
//! applies backpressure to every source at once. Per-source order survives;
//! nothing is promised across sources.
//!
//! Stopping the merge fires the [`CancelHandle`] of every source still being
//! drained, so a worker blocked inside its source wakes up and can be joined.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use rivulet_core::prelude::{
    Batch, EngineConfig, Error, IterId, Merger, Result, SourceId, Timing, Vars,
};

use crate::fail_point;
use crate::queue::BatchQueue;
use crate::traits::{BatchIt, BoxedBatchIt, CancelHandle};

/// Atomic bitset of sources that fed at least one batch.
struct FedBits {
    words: Vec<AtomicU64>,
}

impl FedBits {
    fn new(n: usize) -> Self {
        Self {
            words: (0..n.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn set(&self, idx: usize) {
        self.words[idx / 64].fetch_or(1 << (idx % 64), Ordering::Release);
    }

    fn is_set(&self, idx: usize) -> bool {
        self.words[idx / 64].load(Ordering::Acquire) & (1 << (idx % 64)) != 0
    }

    /// Lowest source index whose bit is set.
    fn first(&self) -> Option<usize> {
        self.words.iter().enumerate().find_map(|(w, word)| {
            let bits = word.load(Ordering::Acquire);
            (bits != 0).then(|| w * 64 + bits.trailing_zeros() as usize)
        })
    }
}

/// State shared between the consumer and the workers.
struct Shared {
    queue: BatchQueue,
    fed: FedBits,
    // spare batches handed back by the consumer, one slot per source
    spares: Vec<Mutex<Option<Batch>>>,
    stop: AtomicBool,
    // taken before the sources move into their workers
    source_cancels: Vec<Option<CancelHandle>>,
    finished: Vec<AtomicBool>,
    active: AtomicUsize,
    failed: AtomicBool,
    late_errors: Mutex<Vec<Error>>,
}

impl Shared {
    fn take_spare(&self, idx: usize) -> Option<Batch> {
        self.spares[idx].try_lock().ok()?.take()
    }

    /// Ask every source still being drained to stop.
    fn cancel_sources(&self) {
        for (idx, handle) in self.source_cancels.iter().enumerate() {
            if self.finished[idx].load(Ordering::Acquire) {
                continue;
            }
            if let Some(handle) = handle {
                if handle.cancel() {
                    tracing::trace!(source = idx, "merge source cancelled");
                }
            }
        }
    }

    fn stop_all(&self) -> bool {
        self.stop.store(true, Ordering::Release);
        let cancelled = self.queue.cancel();
        self.cancel_sources();
        cancelled
    }

    /// Record a worker's exit. The first error completes the queue; the last
    /// worker completes it gracefully.
    fn finish(&self, idx: usize, cause: Option<Error>) {
        if let Some(e) = cause {
            if !self.failed.swap(true, Ordering::AcqRel) {
                tracing::debug!(source = idx, error = %e, "merge source failed");
                self.queue.complete(Some(e));
            } else if e.is_cancellation() {
                tracing::trace!(source = idx, "merge source cancelled after failure");
            } else {
                tracing::debug!(source = idx, error = %e, "merge error suppressed");
                if let Ok(mut late) = self.late_errors.lock() {
                    late.push(e);
                }
            }
        }
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.complete(None);
        }
    }

    fn with_late_errors(&self, e: Error) -> Error {
        let late = match self.late_errors.lock() {
            Ok(mut late) => std::mem::take(&mut *late),
            Err(_) => Vec::new(),
        };
        late.into_iter().fold(e, Error::suppress)
    }
}

pub struct MergeBatchIt {
    id: IterId,
    vars: Vars,
    pending: Vec<(BoxedBatchIt, Option<Merger>)>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    config: EngineConfig,
    started: bool,
    terminated: bool,
}

impl MergeBatchIt {
    /// Merge `sources` into `vars`, projecting sources with another schema.
    pub fn new(vars: Vars, sources: Vec<BoxedBatchIt>) -> Self {
        Self::with_config(vars, sources, EngineConfig::global())
    }

    pub fn with_config(vars: Vars, sources: Vec<BoxedBatchIt>, config: &EngineConfig) -> Self {
        let n = sources.len();
        let timing = config.timing();
        let source_cancels = sources.iter().map(|it| it.cancel_handle()).collect();
        let pending = sources
            .into_iter()
            .map(|it| {
                let projection =
                    (it.vars() != &vars).then(|| Merger::projection(it.vars(), &vars));
                (it, projection)
            })
            .collect();
        let shared = Arc::new(Shared {
            queue: BatchQueue::with_capacity(vars.clone(), n, timing),
            fed: FedBits::new(n),
            spares: (0..n).map(|_| Mutex::new(None)).collect(),
            stop: AtomicBool::new(false),
            source_cancels,
            finished: (0..n).map(|_| AtomicBool::new(false)).collect(),
            active: AtomicUsize::new(n),
            failed: AtomicBool::new(false),
            late_errors: Mutex::new(Vec::new()),
        });
        Self {
            id: IterId::next(),
            vars,
            pending,
            shared,
            workers: Vec::with_capacity(n),
            config: config.clone(),
            started: false,
            terminated: false,
        }
    }

    /// Number of sources, started or not.
    pub fn sources(&self) -> usize {
        self.shared.spares.len()
    }

    /// Whether `source` has fed at least one batch.
    pub fn has_fed(&self, source: SourceId) -> bool {
        source.index() < self.sources() && self.shared.fed.is_set(source.index())
    }

    /// Worker threads not yet joined.
    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|h| !h.is_finished()).count()
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        if self.pending.is_empty() {
            self.shared.queue.complete(None);
            return Ok(());
        }
        let timing = self.shared.queue.timing();
        let pending = std::mem::take(&mut self.pending);
        for (idx, (mut source, projection)) in pending.into_iter().enumerate() {
            source.set_timing(timing);
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(self.config.thread_name("merge", idx))
                .spawn(move || drain(&shared, idx, source, projection));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    // sources not yet handed to a worker are dropped with the iterator
                    let err = Error::Spawn(e.to_string());
                    self.shared.stop_all();
                    return Err(err);
                }
            }
        }
        tracing::debug!(id = %self.id, workers = self.workers.len(), "merge started");
        Ok(())
    }

    /// Stop workers and wait until all of them exited.
    fn shutdown(&mut self) {
        self.shared.stop_all();
        for (mut source, _) in self.pending.drain(..) {
            source.close();
        }
        for handle in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                let e = Error::from_panic(&*payload);
                tracing::warn!(error = %e, "merge worker panicked outside its source");
            }
        }
    }
}

fn drain(shared: &Shared, idx: usize, mut source: BoxedBatchIt, projection: Option<Merger>) {
    tracing::trace!(source = idx, "merge worker started");
    let fed = panic::catch_unwind(AssertUnwindSafe(|| {
        feed(shared, idx, &mut source, projection.as_ref())
    }));
    let cause = match fed {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(payload) => {
            let e = Error::from_panic(&*payload);
            tracing::warn!(source = idx, error = %e, "merge source panicked");
            Some(e)
        }
    };
    shared.finished[idx].store(true, Ordering::Release);
    source.close();
    shared.finish(idx, cause);
    tracing::trace!(source = idx, "merge worker stopped");
}

fn feed(
    shared: &Shared,
    idx: usize,
    source: &mut BoxedBatchIt,
    projection: Option<&Merger>,
) -> Result<()> {
    let mut reusable: Option<Batch> = None;
    while !shared.stop.load(Ordering::Acquire) {
        fail_point!("merge_pull");
        let spare = reusable.take().or_else(|| shared.take_spare(idx));
        let Some(batch) = source.next_batch(spare)? else {
            return Ok(());
        };
        let batch = match projection {
            None => batch,
            Some(m) => {
                let out = m.project_owned(&batch);
                reusable = Some(batch);
                out
            }
        };
        match shared.queue.offer(batch) {
            Ok(back) => {
                shared.fed.set(idx);
                if reusable.is_none() {
                    reusable = back;
                }
            }
            // consumer went away or another source already failed
            Err(Error::Cancelled | Error::QueueTerminated) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl BatchIt for MergeBatchIt {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.terminated {
            return Ok(None);
        }
        if let Some(b) = reusable {
            let _ = self.recycle(b);
        }
        if let Err(e) = self.start() {
            self.terminated = true;
            self.shutdown();
            return Err(e);
        }
        match self.shared.queue.next_batch(None) {
            Ok(Some(b)) => Ok(Some(b)),
            Ok(None) => {
                self.terminated = true;
                self.shutdown();
                tracing::debug!(id = %self.id, "merge exhausted");
                Ok(None)
            }
            Err(e) => {
                self.terminated = true;
                self.shared.stop_all();
                Err(self.shared.with_late_errors(e))
            }
        }
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        let Some(idx) = self.shared.fed.first() else {
            return Some(batch);
        };
        let Ok(mut slot) = self.shared.spares[idx].try_lock() else {
            return Some(batch);
        };
        if slot.is_some() {
            return Some(batch);
        }
        *slot = Some(batch);
        None
    }

    fn timing(&self) -> Timing {
        self.shared.queue.timing()
    }

    fn set_timing(&mut self, timing: Timing) {
        // running sources are owned by their workers and keep their timing
        for (source, _) in self.pending.iter_mut() {
            source.set_timing(timing);
        }
        self.shared.queue.set_timing(timing);
    }

    fn temp_eager(&mut self) {
        for (source, _) in self.pending.iter_mut() {
            source.temp_eager();
        }
        self.shared.queue.set_eager();
    }

    fn try_cancel(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        if !self.started {
            self.started = true;
            for (mut source, _) in self.pending.drain(..) {
                source.close();
            }
        }
        self.shared.stop_all()
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        let shared = Arc::clone(&self.shared);
        Some(CancelHandle::new(move || shared.stop_all()))
    }

    fn close(&mut self) {
        self.terminated = true;
        self.shutdown();
    }

    fn name(&self) -> &'static str {
        "merge"
    }
}

impl Drop for MergeBatchIt {
    fn drop(&mut self) {
        if !self.workers.is_empty() || !self.pending.is_empty() {
            self.shutdown();
        }
    }
}
