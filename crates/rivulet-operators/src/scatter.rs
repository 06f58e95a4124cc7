//! Fan-out: one drainer thread republishes an upstream to N consumers.
//!
//! Every consumer reads from its own single-slot [`BatchQueue`]. The drainer
//! copies each batch into all live consumers but the last one, which gets
//! the batch itself. The slowest consumer therefore paces the upstream.
//!
//! Consumers cancel independently. Only when the last one still interested
//! gives up is the upstream cancelled, through its [`CancelHandle`] when it
//! has one, so a drainer blocked in the upstream wakes up.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rivulet_core::prelude::{Batch, ConsumerId, EngineConfig, Error, Result, Timing, Vars};

use crate::fail_point;
use crate::queue::BatchQueue;
use crate::traits::{BatchIt, BoxedBatchIt, CancelHandle};

struct Shared {
    queues: Vec<BatchQueue>,
    cancelled: Vec<AtomicBool>,
    // consumers that have not cancelled
    interested: AtomicUsize,
    // consumers that have not closed
    open: AtomicUsize,
    upstream_cancel: AtomicBool,
    upstream_handle: Option<CancelHandle>,
    started: AtomicBool,
    upstream: Mutex<Option<BoxedBatchIt>>,
    drainer: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_cancelled(&self, idx: usize) -> bool {
        self.cancelled[idx].load(Ordering::Acquire)
    }

    /// Cancel one consumer. The last interested consumer also requests
    /// upstream cancellation and wakes every queue eagerly.
    fn cancel_consumer(&self, idx: usize) -> bool {
        if self.cancelled[idx].swap(true, Ordering::AcqRel) {
            return false;
        }
        self.queues[idx].cancel();
        if self.interested.fetch_sub(1, Ordering::AcqRel) == 1 {
            for q in &self.queues {
                q.set_eager();
            }
            tracing::debug!("last scatter consumer cancelled, cancelling upstream");
            self.cancel_upstream();
        } else {
            tracing::debug!(consumer = idx, "scatter consumer cancelled");
        }
        true
    }

    fn cancel_upstream(&self) {
        self.upstream_cancel.store(true, Ordering::Release);
        if let Some(handle) = &self.upstream_handle {
            handle.cancel();
        }
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(upstream) = lock(&self.upstream).take() else {
            return Ok(());
        };
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || drain(&shared, upstream));
        match spawned {
            Ok(handle) => {
                *lock(&self.drainer) = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = Error::Spawn(e.to_string());
                for q in &self.queues {
                    q.complete(Some(err.clone()));
                }
                Err(err)
            }
        }
    }

    /// Last consumer out joins the drainer, or closes an upstream that was
    /// never started.
    fn release(&self) {
        if self.open.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if let Some(mut upstream) = lock(&self.upstream).take() {
            upstream.close();
        }
        let handle = lock(&self.drainer).take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                // nobody reads anymore
                self.cancel_upstream();
            }
            if let Err(payload) = handle.join() {
                let e = Error::from_panic(&*payload);
                tracing::warn!(error = %e, "scatter drainer panicked");
            }
        }
    }
}

fn drain(shared: &Shared, mut upstream: BoxedBatchIt) {
    tracing::trace!("scatter drainer started");
    let pumped = panic::catch_unwind(AssertUnwindSafe(|| pump(shared, &mut upstream)));
    let cause = match pumped {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(payload) => {
            let e = Error::from_panic(&*payload);
            tracing::warn!(error = %e, "scatter upstream panicked");
            Some(e)
        }
    };
    let upstream_cancelled = shared.upstream_cancel.load(Ordering::Acquire)
        || (0..shared.queues.len()).all(|idx| shared.is_cancelled(idx));
    if upstream_cancelled {
        upstream.try_cancel();
    }
    upstream.close();
    for (idx, q) in shared.queues.iter().enumerate() {
        let consumer_cause = if shared.is_cancelled(idx) {
            Some(Error::Cancelled)
        } else if let Some(e) = &cause {
            Some(e.clone())
        } else if upstream_cancelled {
            Some(Error::Cancelled)
        } else {
            None
        };
        q.complete(consumer_cause);
    }
    tracing::trace!(failed = cause.is_some(), "scatter drainer stopped");
}

fn pump(shared: &Shared, upstream: &mut BoxedBatchIt) -> Result<()> {
    let mut reusable: Option<Batch> = None;
    loop {
        if shared.upstream_cancel.load(Ordering::Acquire) {
            return Ok(());
        }
        fail_point!("scatter_pull");
        let Some(batch) = upstream.next_batch(reusable.take())? else {
            return Ok(());
        };
        let Some(last) = (0..shared.queues.len()).rev().find(|&i| !shared.is_cancelled(i)) else {
            return Ok(());
        };
        for idx in 0..last {
            if shared.is_cancelled(idx) {
                continue;
            }
            match shared.queues[idx].copy(&batch) {
                Ok(()) => {}
                Err(Error::Cancelled | Error::QueueTerminated) => {
                    shared.cancel_consumer(idx);
                }
                Err(e) => return Err(e),
            }
        }
        match shared.queues[last].offer(batch) {
            Ok(back) => reusable = back.or_else(|| shared.queues[last].take_spare()),
            Err(Error::Cancelled | Error::QueueTerminated) => {
                shared.cancel_consumer(last);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Splits one upstream into N consumers.
pub struct Scatter;

impl Scatter {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(upstream: BoxedBatchIt, consumers: usize) -> Vec<ScatterConsumer> {
        Self::with_config(upstream, consumers, EngineConfig::global())
    }

    pub fn with_config(
        upstream: BoxedBatchIt,
        consumers: usize,
        config: &EngineConfig,
    ) -> Vec<ScatterConsumer> {
        let vars = upstream.vars().clone();
        let timing = upstream.timing();
        let upstream_handle = upstream.cancel_handle();
        let shared = Arc::new(Shared {
            queues: (0..consumers)
                .map(|_| BatchQueue::spsc(vars.clone(), timing))
                .collect(),
            cancelled: (0..consumers).map(|_| AtomicBool::new(false)).collect(),
            interested: AtomicUsize::new(consumers),
            open: AtomicUsize::new(consumers),
            upstream_cancel: AtomicBool::new(false),
            upstream_handle,
            started: AtomicBool::new(false),
            upstream: Mutex::new(Some(upstream)),
            drainer: Mutex::new(None),
            thread_name: config.thread_name("scatter", 0),
        });
        (0..consumers)
            .map(|idx| ScatterConsumer {
                id: ConsumerId::new(idx as u64),
                shared: Arc::clone(&shared),
                terminated: false,
                closed: false,
            })
            .collect()
    }
}

/// One consumer of a [`Scatter`].
pub struct ScatterConsumer {
    id: ConsumerId,
    shared: Arc<Shared>,
    terminated: bool,
    closed: bool,
}

impl ScatterConsumer {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Whether the upstream was asked to stop because every consumer cancelled.
    pub fn upstream_cancel_requested(&self) -> bool {
        self.shared.upstream_cancel.load(Ordering::Acquire)
    }

    fn queue(&self) -> &BatchQueue {
        &self.shared.queues[self.id.index()]
    }
}

impl BatchIt for ScatterConsumer {
    fn vars(&self) -> &Vars {
        self.queue().vars()
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.terminated {
            return Ok(None);
        }
        if let Err(e) = self.shared.start() {
            self.terminated = true;
            return Err(e);
        }
        match self.queue().next_batch(reusable) {
            Ok(Some(b)) => Ok(Some(b)),
            Ok(None) => {
                self.terminated = true;
                Ok(None)
            }
            Err(e) => {
                self.terminated = true;
                Err(e)
            }
        }
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        self.queue().recycle(batch)
    }

    fn timing(&self) -> Timing {
        self.queue().timing()
    }

    fn set_timing(&mut self, timing: Timing) {
        if let Some(upstream) = lock(&self.shared.upstream).as_mut() {
            upstream.set_timing(timing);
        }
        self.queue().set_timing(timing);
    }

    fn temp_eager(&mut self) {
        if let Some(upstream) = lock(&self.shared.upstream).as_mut() {
            upstream.temp_eager();
        }
        self.queue().set_eager();
    }

    fn try_cancel(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        self.shared.cancel_consumer(self.id.index())
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        let shared = Arc::clone(&self.shared);
        let idx = self.id.index();
        Some(CancelHandle::new(move || shared.cancel_consumer(idx)))
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if !self.terminated {
            self.terminated = true;
            self.shared.cancel_consumer(self.id.index());
        }
        self.shared.release();
    }

    fn name(&self) -> &'static str {
        "scatter"
    }
}

impl Drop for ScatterConsumer {
    fn drop(&mut self) {
        self.close();
    }
}
