//! Flat-map: every item of an original iterator opens a nested `BatchIt`.

use rivulet_core::prelude::{Batch, Error, Merger, Result, Timing, Vars};

use crate::traits::{BatchIt, BoxedBatchIt, Pacing, Termination};

/// Drains one nested iterator per original item, in order.
///
/// `map` may fail; its error terminates the flat-map like an upstream error.
/// Nested iterators whose schema differs from `vars` are projected.
pub struct FlatMapBatchIt<I, F> {
    vars: Vars,
    original: I,
    map: F,
    nested: Option<(BoxedBatchIt, Option<Merger>)>,
    pacing: Pacing,
    termination: Termination,
    cancelled: bool,
    opened: u64,
}

impl<T, I, F> FlatMapBatchIt<I, F>
where
    I: Iterator<Item = Result<T>> + Send,
    F: FnMut(T) -> Result<BoxedBatchIt> + Send,
{
    pub fn new(vars: Vars, original: I, map: F) -> Self {
        Self {
            vars,
            original,
            map,
            nested: None,
            pacing: Pacing::default(),
            termination: Termination::new(),
            cancelled: false,
            opened: 0,
        }
    }

    /// Nested iterators opened so far.
    pub fn opened(&self) -> u64 {
        self.opened
    }

    fn open_next(&mut self) -> Result<bool> {
        let Some(item) = self.original.next() else {
            return Ok(false);
        };
        let mut it = (self.map)(item?)?;
        it.set_timing(self.pacing.timing);
        if self.pacing.eager {
            it.temp_eager();
        }
        let projection =
            (it.vars() != &self.vars).then(|| Merger::projection(it.vars(), &self.vars));
        self.nested = Some((it, projection));
        self.opened += 1;
        Ok(true)
    }

    fn cleanup(&mut self, cause: Option<&Error>) {
        if !self.termination.begin() {
            return;
        }
        if let Some((mut it, _)) = self.nested.take() {
            it.close();
        }
        tracing::debug!(opened = self.opened, failed = cause.is_some(), "flat_map terminated");
    }
}

impl<T, I, F> BatchIt for FlatMapBatchIt<I, F>
where
    I: Iterator<Item = Result<T>> + Send,
    F: FnMut(T) -> Result<BoxedBatchIt> + Send,
{
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
        let mut reusable = reusable;
        loop {
            if self.nested.is_none() {
                match self.open_next() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.cleanup(None);
                        return Ok(None);
                    }
                    Err(e) => {
                        self.cleanup(Some(&e));
                        return Err(e);
                    }
                }
            }
            let Some((it, projection)) = self.nested.as_mut() else {
                continue;
            };
            match it.next_batch(reusable.take()) {
                Ok(Some(b)) if b.is_empty() => reusable = Some(b),
                Ok(Some(b)) => {
                    self.pacing.delivered();
                    let out = match projection {
                        None => b,
                        Some(m) => {
                            let out = m.project_owned(&b);
                            let _ = it.recycle(b);
                            out
                        }
                    };
                    return Ok(Some(out));
                }
                Ok(None) => {
                    if let Some((mut done, _)) = self.nested.take() {
                        done.close();
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
        match self.nested.as_mut() {
            Some((it, None)) => it.recycle(batch),
            _ => Some(batch),
        }
    }

    fn timing(&self) -> Timing {
        self.pacing.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        if let Some((it, _)) = self.nested.as_mut() {
            it.set_timing(timing);
        }
        self.pacing.timing = timing;
    }

    fn temp_eager(&mut self) {
        if let Some((it, _)) = self.nested.as_mut() {
            it.temp_eager();
        }
        self.pacing.eager = true;
    }

    fn try_cancel(&mut self) -> bool {
        if self.termination.is_done() {
            return false;
        }
        if let Some((it, _)) = self.nested.as_mut() {
            it.try_cancel();
        }
        self.cleanup(Some(&Error::Cancelled));
        self.cancelled = true;
        true
    }

    fn close(&mut self) {
        self.cancelled = false;
        self.cleanup(None);
    }

    fn name(&self) -> &'static str {
        "flat_map"
    }
}
