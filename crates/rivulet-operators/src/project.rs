//! Projection processor: reshape batches onto a narrower (or reordered) schema.

use rivulet_core::prelude::{Batch, Merger, Result, Vars};

use crate::processor::BatchProcessor;

/// Projects every batch onto `out`. Variables of `out` missing from the input
/// come out unbound.
pub struct ProjectProcessor {
    merger: Merger,
    scratch: Option<Batch>,
}

impl ProjectProcessor {
    pub fn new(input: &Vars, out: &Vars) -> Self {
        Self {
            merger: Merger::projection(input, out),
            scratch: None,
        }
    }

    /// Keep only `names`, in that order.
    pub fn select<I, S>(input: &Vars, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(input, &Vars::new(names))
    }

    pub fn is_identity(&self) -> bool {
        self.merger.is_identity()
    }
}

impl BatchProcessor for ProjectProcessor {
    fn out_vars(&self, _input: &Vars) -> Vars {
        self.merger.out_vars().clone()
    }

    fn process(&mut self, batch: Batch) -> Result<Batch> {
        if self.merger.is_identity() {
            return Ok(batch);
        }
        let mut out = self.scratch.take().unwrap_or_default();
        out.clear(self.merger.out_cols());
        self.merger.project(&mut out, &batch);
        // the input allocation backs the next projection
        self.scratch = Some(batch);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "project"
    }
}
