//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use rivulet_core::prelude::{Batch, Cell, Error, Result, Term, Timing, Vars};
use rivulet_operators::{
    BatchIt, BatchItExt, BatchQueue, BoxedBatchIt, CancelHandle, QueueReader, VecBatchIt,
};

pub fn vars(names: &[&str]) -> Vars {
    Vars::new(names.iter().copied())
}

/// Cells from shorthand: `"-"` is unbound, anything else goes through
/// `Term::parse`.
pub fn row(cells: &[&str]) -> Vec<Cell> {
    cells
        .iter()
        .map(|c| if *c == "-" { None } else { Some(Term::parse(c)) })
        .collect()
}

pub fn batch(cols: usize, rows: &[&[&str]]) -> Batch {
    Batch::from_rows(cols, rows.iter().map(|r| row(r)))
}

/// One-batch in-memory source.
pub fn source(names: &[&str], rows: &[&[&str]]) -> BoxedBatchIt {
    Box::new(VecBatchIt::new(vars(names), [batch(names.len(), rows)]))
}

/// Source serving `n` rows `<prefix-0>..` in batches of `per_batch`.
pub fn numbered(name: &str, prefix: &str, n: usize, per_batch: usize) -> BoxedBatchIt {
    let cells: Vec<Vec<Cell>> = (0..n)
        .map(|i| vec![Some(Term::iri(format!("{prefix}-{i}")))])
        .collect();
    let batches: Vec<Batch> = cells
        .chunks(per_batch.max(1))
        .map(|chunk| Batch::from_rows(1, chunk.iter().cloned()))
        .collect();
    Box::new(VecBatchIt::new(vars(&[name]), batches))
}

/// Source over a queue holding one batch that is never completed: the
/// second pull blocks until the queue is cancelled.
pub fn stalled(name: &str) -> (Arc<BatchQueue>, BoxedBatchIt) {
    let queue = Arc::new(BatchQueue::spsc(vars(&[name]), Timing::default()));
    let first = Batch::from_rows(1, [vec![Some(Term::iri("first"))]]);
    let _ = queue.offer(first);
    let reader = QueueReader::new(Arc::clone(&queue));
    (queue, Box::new(reader))
}

/// Run `f` on a helper thread; `true` if it returned within `limit`.
pub fn returns_within<F>(limit: Duration, f: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    rx.recv_timeout(limit).is_ok()
}

/// Drain through the row view.
pub fn drain(it: &mut dyn BatchIt) -> Result<Vec<Vec<Cell>>> {
    it.rows().collect()
}

/// Drain batch by batch, keeping batch boundaries.
pub fn drain_batches(it: &mut dyn BatchIt) -> Result<Vec<Batch>> {
    let mut out = Vec::new();
    while let Some(b) = it.next_batch(None)? {
        out.push(b);
    }
    Ok(out)
}

pub fn iri(s: &str) -> Option<Term> {
    Some(Term::iri(s))
}

/// Counters shared with a `ProbeBatchIt`.
#[derive(Default)]
pub struct Probe {
    pub pulls: AtomicUsize,
    pub closes: AtomicUsize,
    pub cancels: AtomicUsize,
    pub recycled: AtomicUsize,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }
}

/// Wraps an iterator, counting calls and optionally sleeping before pulls.
pub struct ProbeBatchIt {
    inner: BoxedBatchIt,
    probe: Arc<Probe>,
    delay: Option<Duration>,
}

impl ProbeBatchIt {
    pub fn new(inner: BoxedBatchIt, probe: &Arc<Probe>) -> Self {
        Self {
            inner,
            probe: Arc::clone(probe),
            delay: None,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn boxed(self) -> BoxedBatchIt {
        Box::new(self)
    }
}

impl BatchIt for ProbeBatchIt {
    fn vars(&self) -> &Vars {
        self.inner.vars()
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            thread::sleep(d);
        }
        self.inner.next_batch(reusable)
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        self.probe.recycled.fetch_add(1, Ordering::SeqCst);
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
        self.probe.cancels.fetch_add(1, Ordering::SeqCst);
        self.inner.try_cancel()
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        self.inner.cancel_handle()
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close();
    }

    fn name(&self) -> &'static str {
        "probe"
    }
}

/// Panics on the first pull.
pub struct PanickingBatchIt {
    vars: Vars,
}

impl PanickingBatchIt {
    pub fn boxed(names: &[&str]) -> BoxedBatchIt {
        Box::new(Self { vars: vars(names) })
    }
}

impl BatchIt for PanickingBatchIt {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, _reusable: Option<Batch>) -> Result<Option<Batch>> {
        panic!("source exploded");
    }

    fn timing(&self) -> Timing {
        Timing::default()
    }

    fn set_timing(&mut self, _timing: Timing) {}

    fn temp_eager(&mut self) {}

    fn try_cancel(&mut self) -> bool {
        false
    }

    fn close(&mut self) {}
}

pub fn source_error(msg: &str) -> Error {
    Error::Source(msg.to_string())
}
