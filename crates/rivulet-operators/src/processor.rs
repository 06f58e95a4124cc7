//! Pass-through stages: in-place processors and allocating converters.

use rivulet_core::prelude::{Batch, Error, Result, Timing, Vars};

use crate::traits::{BatchIt, BoxedBatchIt, CancelHandle, Pacing, Termination};

/// In-place batch transform.
pub trait BatchProcessor: Send {
    /// Output schema for an upstream with schema `input`.
    fn out_vars(&self, input: &Vars) -> Vars {
        input.clone()
    }

    /// Transform `batch` and hand it back. An empty result makes the stage
    /// pull again.
    fn process(&mut self, batch: Batch) -> Result<Batch>;

    fn name(&self) -> &'static str {
        "processor"
    }
}

/// Runs a `BatchProcessor` over every upstream batch.
pub struct ProcessorBatchIt<P> {
    upstream: BoxedBatchIt,
    processor: P,
    vars: Vars,
    // output batches fit the upstream's shape and may be handed back to it
    same_shape: bool,
    pacing: Pacing,
    termination: Termination,
}

impl<P: BatchProcessor> ProcessorBatchIt<P> {
    pub fn new(upstream: BoxedBatchIt, processor: P) -> Self {
        let vars = processor.out_vars(upstream.vars());
        let same_shape = &vars == upstream.vars();
        Self {
            upstream,
            processor,
            vars,
            same_shape,
            pacing: Pacing::default(),
            termination: Termination::new(),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    fn cleanup(&mut self, cause: Option<&Error>) {
        if !self.termination.begin() {
            return;
        }
        self.upstream.close();
        tracing::debug!(
            processor = self.processor.name(),
            failed = cause.is_some(),
            "processor terminated"
        );
    }
}

impl<P: BatchProcessor> BatchIt for ProcessorBatchIt<P> {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.termination.is_done() {
            return Ok(None);
        }
        let mut reusable = reusable.filter(|_| self.same_shape);
        loop {
            let batch = match self.upstream.next_batch(reusable.take()) {
                Ok(Some(b)) => b,
                Ok(None) => {
                    self.cleanup(None);
                    return Ok(None);
                }
                Err(e) => {
                    self.cleanup(Some(&e));
                    return Err(e);
                }
            };
            match self.processor.process(batch) {
                Ok(out) if out.is_empty() => reusable = Some(out).filter(|_| self.same_shape),
                Ok(out) => {
                    self.pacing.delivered();
                    return Ok(Some(out));
                }
                Err(e) => {
                    self.cleanup(Some(&e));
                    return Err(e);
                }
            }
        }
    }

    fn recycle(&mut self, batch: Batch) -> Option<Batch> {
        if !self.same_shape {
            return Some(batch);
        }
        self.upstream.recycle(batch)
    }

    fn timing(&self) -> Timing {
        self.pacing.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        self.upstream.set_timing(timing);
        self.pacing.timing = timing;
    }

    fn temp_eager(&mut self) {
        self.upstream.temp_eager();
        self.pacing.eager = true;
    }

    fn try_cancel(&mut self) -> bool {
        if self.termination.is_done() {
            return false;
        }
        self.upstream.try_cancel()
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        self.upstream.cancel_handle()
    }

    fn close(&mut self) {
        self.cleanup(None);
    }

    fn name(&self) -> &'static str {
        self.processor.name()
    }
}

/// Allocating batch transform: reads `input`, appends to `out`.
pub trait BatchConverter: Send {
    fn out_vars(&self, input: &Vars) -> Vars;

    fn convert(&mut self, out: &mut Batch, input: &Batch) -> Result<()>;

    fn name(&self) -> &'static str {
        "converter"
    }
}

/// Runs a `BatchConverter`, keeping the last input batch as a reusable
/// buffer for the next upstream pull.
pub struct ConverterBatchIt<C> {
    upstream: BoxedBatchIt,
    converter: C,
    vars: Vars,
    buffered: Option<Batch>,
    pacing: Pacing,
    termination: Termination,
}

impl<C: BatchConverter> ConverterBatchIt<C> {
    pub fn new(upstream: BoxedBatchIt, converter: C) -> Self {
        let vars = converter.out_vars(upstream.vars());
        Self {
            upstream,
            converter,
            vars,
            buffered: None,
            pacing: Pacing::default(),
            termination: Termination::new(),
        }
    }

    /// Whether an input batch is held for reuse.
    pub fn has_buffered_input(&self) -> bool {
        self.buffered.is_some()
    }

    fn cleanup(&mut self, cause: Option<&Error>) {
        if !self.termination.begin() {
            return;
        }
        if let Some(b) = self.buffered.take() {
            let _ = self.upstream.recycle(b);
        }
        self.upstream.close();
        tracing::debug!(
            converter = self.converter.name(),
            failed = cause.is_some(),
            "converter terminated"
        );
    }
}

impl<C: BatchConverter> BatchIt for ConverterBatchIt<C> {
    fn vars(&self) -> &Vars {
        &self.vars
    }

    fn next_batch(&mut self, reusable: Option<Batch>) -> Result<Option<Batch>> {
        if self.termination.is_done() {
            return Ok(None);
        }
        let mut out = reusable.unwrap_or_default();
        out.clear(self.vars.len());
        loop {
            let input = match self.upstream.next_batch(self.buffered.take()) {
                Ok(Some(b)) => b,
                Ok(None) => {
                    self.cleanup(None);
                    return Ok(None);
                }
                Err(e) => {
                    self.cleanup(Some(&e));
                    return Err(e);
                }
            };
            let converted = self.converter.convert(&mut out, &input);
            self.buffered = Some(input);
            if let Err(e) = converted {
                self.cleanup(Some(&e));
                return Err(e);
            }
            if !out.is_empty() {
                self.pacing.delivered();
                return Ok(Some(out));
            }
        }
    }

    fn timing(&self) -> Timing {
        self.pacing.timing
    }

    fn set_timing(&mut self, timing: Timing) {
        self.upstream.set_timing(timing);
        self.pacing.timing = timing;
    }

    fn temp_eager(&mut self) {
        self.upstream.temp_eager();
        self.pacing.eager = true;
    }

    fn try_cancel(&mut self) -> bool {
        if self.termination.is_done() {
            return false;
        }
        self.upstream.try_cancel()
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        self.upstream.cancel_handle()
    }

    fn close(&mut self) {
        self.cleanup(None);
    }

    fn name(&self) -> &'static str {
        self.converter.name()
    }
}
