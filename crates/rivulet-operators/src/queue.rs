//! Timing-aware batch handoff queue.
//!
//! A `BatchQueue` sits between producer thread(s) and one consumer. It keeps up
//! to `capacity` published ("ready") batches plus one batch being filled. With
//! `capacity == 1` it is the plain SPSC handoff cell: a second batch can only
//! start filling after the consumer took the first one, so exactly one batch
//! object is live in the queue.
//!
//! All shared state lives in one `AtomicU32` flag word and a slot guarded by
//! the `WRITING` bit of that word. The bit is taken with a compare-and-swap
//! spin and held only for constant-time edits of the slot; nobody blocks
//! while holding it.
//!
//! Waiting is spin-then-park. A thread that must wait registers its handle and
//! sets its `PARKED_*` flag while still holding `WRITING`, then releases the
//! bit and parks. The other side changes state under `WRITING`, clears the
//! flag, and unparks after releasing. Because `unpark` before `park` leaves a
//! token behind, a wake issued between registration and parking is not lost.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use rivulet_core::prelude::{Batch, Error, Result, Timing, Vars};

use crate::traits::{BatchIt, CancelHandle};

pub const READY: u32 = 1;
pub const PARKED_CONSUMER: u32 = 1 << 1;
pub const PARKED_PRODUCER: u32 = 1 << 2;
pub const WRITING: u32 = 1 << 3;
pub const TERMINATED: u32 = 1 << 4;
pub const CANCELLED: u32 = 1 << 5;

const SPIN_LIMIT: u32 = 64;

/// Coarse queue state, derived from the flag word and the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing buffered.
    Empty,
    /// A batch is being filled but is not published yet.
    Filling,
    /// At least one batch is published.
    Ready,
    /// Completed or cancelled, with nothing left to deliver.
    Terminated,
}

struct Slot {
    ready: VecDeque<Batch>,
    filling: Option<Batch>,
    fill_start: Instant,
    spare: Option<Batch>,
    timing: Timing,
    eager: bool,
    cause: Option<Error>,
    consumer: Option<Thread>,
    producers: Vec<Thread>,
}

pub struct BatchQueue {
    state: AtomicU32,
    slot: UnsafeCell<Slot>,
    capacity: usize,
    vars: Vars,
}

// SAFETY: `slot` is only reached through `SlotGuard`, which exists only while
// the holder owns the `WRITING` bit, so at most one thread touches it at a time.
#[allow(unsafe_code)]
unsafe impl Sync for BatchQueue {}

enum Item<'a> {
    Owned(Batch),
    Copied(&'a Batch),
}

impl Item<'_> {
    fn rows(&self) -> usize {
        match self {
            Item::Owned(b) => b.rows(),
            Item::Copied(b) => b.rows(),
        }
    }
}

impl BatchQueue {
    /// Plain SPSC queue: one ready batch at most.
    pub fn spsc(vars: Vars, timing: Timing) -> Self {
        Self::with_capacity(vars, 1, timing)
    }

    /// Queue holding up to `capacity` ready batches (one per fan-in source).
    pub fn with_capacity(vars: Vars, capacity: usize, timing: Timing) -> Self {
        Self {
            state: AtomicU32::new(0),
            slot: UnsafeCell::new(Slot {
                ready: VecDeque::with_capacity(capacity.max(1)),
                filling: None,
                fill_start: Instant::now(),
                spare: None,
                timing,
                eager: false,
                cause: None,
                consumer: None,
                producers: Vec::new(),
            }),
            capacity: capacity.max(1),
            vars,
        }
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn max_ready_batches(&self) -> usize {
        self.capacity
    }

    pub fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) & TERMINATED != 0
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) & CANCELLED != 0
    }

    /// Raw flag word, for diagnostics and tests.
    pub fn flags(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    pub fn state(&self) -> QueueState {
        let g = self.lock();
        if !g.ready.is_empty() {
            QueueState::Ready
        } else if g.filling.is_some() {
            QueueState::Filling
        } else if g.has(TERMINATED) {
            QueueState::Terminated
        } else {
            QueueState::Empty
        }
    }

    /// Published batches waiting for the consumer.
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn timing(&self) -> Timing {
        self.lock().timing
    }

    pub fn set_timing(&self, timing: Timing) {
        let mut g = self.lock();
        g.timing = timing;
        // a parked consumer computed its timeout from the old timing
        g.wake_consumer();
    }

    /// Publish the next batch as soon as it has one row.
    pub fn set_eager(&self) {
        let mut g = self.lock();
        g.eager = true;
        g.publish_if_ready();
        g.wake_consumer();
    }

    /// Unpark the consumer so it re-evaluates the queue.
    pub fn wake_consumer(&self) {
        self.lock().wake_consumer();
    }

    // ---- producer side ----

    /// Transfer `batch` into the queue. Blocks while the queue is full.
    ///
    /// Returns a batch the producer may refill: the emptied `batch` when its
    /// rows were appended to the batch already filling, or `None` when the
    /// queue took `batch` itself.
    pub fn offer(&self, batch: Batch) -> Result<Option<Batch>> {
        if batch.rows() == 0 {
            return Ok(Some(batch));
        }
        self.push(Item::Owned(batch))
    }

    /// Append the rows of `batch` by value. Blocks while the queue is full.
    pub fn copy(&self, batch: &Batch) -> Result<()> {
        if batch.rows() == 0 {
            return Ok(());
        }
        self.push(Item::Copied(batch)).map(|_| ())
    }

    /// Take the spare batch the consumer recycled, if any.
    pub fn take_spare(&self) -> Option<Batch> {
        self.lock().spare.take()
    }

    /// Terminate the queue. `None` means graceful exhaustion. Buffered
    /// batches are still delivered before the cause. Returns `false` if the
    /// queue was already terminated.
    pub fn complete(&self, cause: Option<Error>) -> bool {
        let mut g = self.lock();
        if g.has(TERMINATED) {
            return false;
        }
        g.set(TERMINATED);
        g.cause = cause;
        g.publish();
        g.wake_consumer();
        g.wake_producers();
        tracing::trace!(vars = %self.vars, "queue completed");
        true
    }

    fn push(&self, item: Item<'_>) -> Result<Option<Batch>> {
        loop {
            let mut g = self.lock();
            g.forget_producer();
            if g.has(TERMINATED) {
                return Err(g.terminated_error());
            }
            if g.ready.len() >= self.capacity {
                g.park_producer();
                drop(g);
                thread::park();
                continue;
            }

            let timing = g.effective_timing();
            let filling_rows = g.filling.as_ref().map_or(0, Batch::rows);
            if filling_rows > 0 && filling_rows + item.rows() > timing.max_batch {
                // no room left in the filling batch: publish it and retry
                g.publish();
                continue;
            }

            let back = match item {
                Item::Owned(mut b) => {
                    if let Some(f) = g.filling.as_mut() {
                        f.append(&mut b);
                        Some(b)
                    } else {
                        g.start_filling(b);
                        None
                    }
                }
                Item::Copied(b) => {
                    if let Some(f) = g.filling.as_mut() {
                        f.put(b);
                    } else {
                        let mut fresh = g
                            .spare
                            .take()
                            .unwrap_or_else(|| Batch::with_capacity(b.cols(), b.rows()));
                        fresh.clear(b.cols());
                        fresh.put(b);
                        g.start_filling(fresh);
                    }
                    None
                }
            };
            g.publish_if_ready();
            return Ok(back);
        }
    }

    // ---- consumer side ----

    /// Take the next batch, waiting for it to be published or for the
    /// consumer's wait budget to allow stealing the filling batch.
    pub fn next_batch(&self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        let mut reusable = reusable;
        loop {
            let mut g = self.lock();
            g.forget_consumer();
            if let Some(b) = reusable.take() {
                if g.spare.is_none() {
                    g.spare = Some(b);
                }
            }

            if let Some(b) = g.ready.pop_front() {
                if g.ready.is_empty() {
                    g.clear(READY);
                }
                g.eager = false;
                g.wake_producers();
                tracing::trace!(rows = b.rows(), "queue handoff");
                return Ok(Some(b));
            }

            let filling_rows = g.filling.as_ref().map_or(0, Batch::rows);
            let park_for = if filling_rows > 0 {
                let wait = g.effective_timing().ready_in_nanos(filling_rows, g.fill_start);
                if wait == 0 || g.has(TERMINATED) {
                    let stolen = g.filling.take();
                    g.eager = false;
                    g.wake_producers();
                    tracing::trace!(rows = filling_rows, "queue steal");
                    return Ok(stolen);
                }
                Some(Duration::from_nanos(wait))
            } else if g.has(TERMINATED) {
                return match g.cause.take() {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            } else {
                None
            };

            g.park_consumer();
            drop(g);
            match park_for {
                Some(d) => thread::park_timeout(d),
                None => thread::park(),
            }
        }
    }

    /// Keep `batch` as the producer's next buffer. Returns it when a spare is
    /// already held.
    pub fn recycle(&self, batch: Batch) -> Option<Batch> {
        let mut g = self.lock();
        if g.spare.is_some() || g.has(CANCELLED) {
            return Some(batch);
        }
        g.spare = Some(batch);
        None
    }

    /// Consumer-side cancellation: drop buffered batches, fail further
    /// offers, and wake everyone. Returns `false` if already cancelled.
    pub fn cancel(&self) -> bool {
        let mut g = self.lock();
        if g.has(CANCELLED) {
            return false;
        }
        g.set(TERMINATED | CANCELLED);
        g.clear(READY);
        g.ready.clear();
        g.filling = None;
        g.spare = None;
        g.cause = Some(Error::Cancelled);
        g.wake_producers();
        g.wake_consumer();
        tracing::debug!(vars = %self.vars, "queue cancelled");
        true
    }

    fn lock(&self) -> SlotGuard<'_> {
        let mut spins = 0u32;
        loop {
            let cur = self.state.load(Ordering::Relaxed);
            if cur & WRITING == 0
                && self
                    .state
                    .compare_exchange_weak(cur, cur | WRITING, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return SlotGuard {
                    queue: self,
                    unpark_consumer: None,
                    unpark_producers: Vec::new(),
                };
            }
            spins += 1;
            if spins < SPIN_LIMIT {
                hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
    }
}

impl fmt::Debug for BatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchQueue")
            .field("vars", &self.vars)
            .field("capacity", &self.capacity)
            .field("flags", &format_args!("{:#08b}", self.flags()))
            .finish()
    }
}

/// Exclusive access to the slot while the `WRITING` bit is held. Threads to
/// wake are collected and unparked after the bit is released.
struct SlotGuard<'a> {
    queue: &'a BatchQueue,
    unpark_consumer: Option<Thread>,
    unpark_producers: Vec<Thread>,
}

impl SlotGuard<'_> {
    fn has(&self, flag: u32) -> bool {
        self.queue.state.load(Ordering::Relaxed) & flag != 0
    }

    fn set(&self, flag: u32) {
        self.queue.state.fetch_or(flag, Ordering::Relaxed);
    }

    fn clear(&self, flag: u32) {
        self.queue.state.fetch_and(!flag, Ordering::Relaxed);
    }

    fn effective_timing(&self) -> Timing {
        if self.eager {
            self.timing.eager()
        } else {
            self.timing
        }
    }

    fn terminated_error(&self) -> Error {
        if self.has(CANCELLED) {
            Error::Cancelled
        } else {
            Error::QueueTerminated
        }
    }

    fn start_filling(&mut self, batch: Batch) {
        self.filling = Some(batch);
        self.fill_start = Instant::now();
        // the consumer may now be able to steal once its budget runs out
        self.wake_consumer();
    }

    /// Move the filling batch to the ready list.
    fn publish(&mut self) {
        if let Some(b) = self.filling.take() {
            if b.rows() > 0 {
                self.ready.push_back(b);
                self.set(READY);
                self.wake_consumer();
            } else if self.spare.is_none() {
                self.spare = Some(b);
            }
        }
    }

    fn publish_if_ready(&mut self) {
        let rows = self.filling.as_ref().map_or(0, Batch::rows);
        if rows > 0
            && self.ready.len() < self.queue.capacity
            && self.effective_timing().ready_in_nanos(rows, self.fill_start) == 0
        {
            self.publish();
        }
    }

    fn wake_consumer(&mut self) {
        if self.has(PARKED_CONSUMER) {
            self.clear(PARKED_CONSUMER);
            self.unpark_consumer = self.consumer.take();
        }
    }

    fn wake_producers(&mut self) {
        if self.has(PARKED_PRODUCER) {
            self.clear(PARKED_PRODUCER);
            let parked = std::mem::take(&mut self.producers);
            self.unpark_producers.extend(parked);
        }
    }

    fn park_consumer(&mut self) {
        self.consumer = Some(thread::current());
        self.set(PARKED_CONSUMER);
    }

    fn park_producer(&mut self) {
        let me = thread::current();
        if !self.producers.iter().any(|t| t.id() == me.id()) {
            self.producers.push(me);
        }
        self.set(PARKED_PRODUCER);
    }

    // A thread that returned from park_timeout (or spuriously) may still be
    // registered; drop the stale registration before re-evaluating.
    fn forget_consumer(&mut self) {
        if self.has(PARKED_CONSUMER) {
            self.clear(PARKED_CONSUMER);
            self.consumer = None;
        }
    }

    fn forget_producer(&mut self) {
        let me = thread::current().id();
        self.producers.retain(|t| t.id() != me);
        if self.producers.is_empty() {
            self.clear(PARKED_PRODUCER);
        }
    }
}

#[allow(unsafe_code)]
impl Deref for SlotGuard<'_> {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        // SAFETY: the guard owns the WRITING bit (see `BatchQueue::lock`).
        unsafe { &*self.queue.slot.get() }
    }
}

#[allow(unsafe_code)]
impl DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut Slot {
        // SAFETY: the guard owns the WRITING bit, and `&mut self` rules out
        // any other reference derived from this guard.
        unsafe { &mut *self.queue.slot.get() }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.queue.state.fetch_and(!WRITING, Ordering::Release);
        if let Some(t) = self.unpark_consumer.take() {
            t.unpark();
        }
        for t in self.unpark_producers.drain(..) {
            t.unpark();
        }
    }
}

/// Consumer end of a standalone queue, exposed as a `BatchIt`.
pub struct QueueReader {
    queue: Arc<BatchQueue>,
    terminated: bool,
}

impl QueueReader {
    pub fn new(queue: Arc<BatchQueue>) -> Self {
        Self {
            queue,
            terminated: false,
        }
    }

    pub fn queue(&self) -> &Arc<BatchQueue> {
        &self.queue
    }
}

impl BatchIt for QueueReader {
    fn vars(&self) -> &Vars {
        self.queue.vars()
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.terminated {
            return Ok(None);
        }
        match self.queue.next_batch(reusable) {
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
        self.queue.recycle(batch)
    }

    fn timing(&self) -> Timing {
        self.queue.timing()
    }

    fn set_timing(&mut self, timing: Timing) {
        self.queue.set_timing(timing);
    }

    fn temp_eager(&mut self) {
        self.queue.set_eager();
    }

    fn try_cancel(&mut self) -> bool {
        self.queue.cancel()
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        let queue = Arc::clone(&self.queue);
        Some(CancelHandle::new(move || queue.cancel()))
    }

    fn close(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.queue.cancel();
        }
    }

    fn name(&self) -> &'static str {
        "queue_reader"
    }
}
