//! Concatenation (SPARQL UNION without correlation): drain sources in order.

use std::collections::VecDeque;

use rivulet_core::prelude::{Batch, Error, IterId, Merger, Result, Timing, Vars};

use crate::traits::{BatchIt, BoxedBatchIt, CancelHandle, Pacing, Termination};

pub struct ConcatBatchIt {
    id: IterId,
    vars: Vars,
    current: Option<Source>,
    pending: VecDeque<BoxedBatchIt>,
    pacing: Pacing,
    termination: Termination,
    cancelled: bool,
}

struct Source {
    it: BoxedBatchIt,
    projection: Option<Merger>,
}

impl ConcatBatchIt {
    /// Concatenate `sources`, projecting each onto `vars` when its schema differs.
    pub fn new(vars: Vars, sources: impl IntoIterator<Item = BoxedBatchIt>) -> Self {
        Self {
            id: IterId::next(),
            vars,
            current: None,
            pending: sources.into_iter().collect(),
            pacing: Pacing::default(),
            termination: Termination::new(),
            cancelled: false,
        }
    }

    /// Output schema is the union of the source schemas, in order.
    pub fn union_of(sources: Vec<BoxedBatchIt>) -> Self {
        let vars = sources
            .iter()
            .fold(Vars::empty(), |acc, s| acc.union(s.vars()));
        Self::new(vars, sources)
    }

    /// Sources not yet started.
    pub fn pending_sources(&self) -> usize {
        self.pending.len()
    }

    fn advance(&mut self) -> bool {
        let Some(mut it) = self.pending.pop_front() else {
            return false;
        };
        it.set_timing(self.pacing.timing);
        if self.pacing.eager {
            it.temp_eager();
        }
        let projection = if it.vars() == &self.vars {
            None
        } else {
            Some(Merger::projection(it.vars(), &self.vars))
        };
        self.current = Some(Source { it, projection });
        true
    }

    /// Close the current and every unvisited source, once.
    fn cleanup(&mut self, cause: Option<&Error>) {
        if !self.termination.begin() {
            return;
        }
        if let Some(mut src) = self.current.take() {
            src.it.close();
        }
        let unvisited = self.pending.len();
        for mut it in self.pending.drain(..) {
            it.close();
        }
        tracing::debug!(
            id = %self.id,
            unvisited,
            failed = cause.is_some(),
            "concat terminated"
        );
    }
}

impl BatchIt for ConcatBatchIt {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.termination.is_done() {
            // a cancelled concat reports it once, then reads as exhausted
            if std::mem::take(&mut self.cancelled) {
                return Err(Error::Cancelled);
            }
            return Ok(None);
        }
        let mut reusable = reusable;
        loop {
            if self.current.is_none() && !self.advance() {
                self.cleanup(None);
                return Ok(None);
            }
            let Some(src) = self.current.as_mut() else {
                continue;
            };
            match src.it.next_batch(reusable.take()) {
                Ok(Some(b)) if b.rows() == 0 => reusable = Some(b),
                Ok(Some(b)) => {
                    self.pacing.delivered();
                    return Ok(Some(match &src.projection {
                        None => b,
                        Some(m) => {
                            let out = m.project_owned(&b);
                            let _ = src.it.recycle(b);
                            out
                        }
                    }));
                }
                Ok(None) => {
                    if let Some(mut done) = self.current.take() {
                        done.it.close();
                    }
                }
                Err(e) => {
                    self.cleanup(Some(&e));
                    return Err(e);
                }
            }
        }
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        match self.current.as_mut() {
            Some(src) if src.projection.is_none() => src.it.recycle(batch),
            _ => Some(batch),
        }
    }

    fn timing(&self) -> Timing {
        self.pacing.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        if let Some(src) = self.current.as_mut() {
            src.it.set_timing(timing);
        }
        self.pacing.timing = timing;
    }

    fn temp_eager(&mut self) {
        if let Some(src) = self.current.as_mut() {
            src.it.temp_eager();
        }
        self.pacing.eager = true;
    }

    fn try_cancel(&mut self) -> bool {
        if self.termination.is_done() {
            return false;
        }
        if let Some(src) = self.current.as_mut() {
            src.it.try_cancel();
        }
        self.cleanup(Some(&Error::Cancelled));
        self.cancelled = true;
        true
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        let handles = self
            .current
            .iter()
            .map(|src| &src.it)
            .chain(self.pending.iter())
            .filter_map(|it| it.cancel_handle())
            .collect();
        CancelHandle::all(handles)
    }

    fn close(&mut self) {
        self.cancelled = false;
        self.cleanup(None);
    }

    fn name(&self) -> &'static str {
        "concat"
    }
}
