//! Row bindings handed to `bind` callbacks.

use crate::schema::Vars;
use crate::types::{Batch, Cell, Term};

/// Binds the variables of `vars` to the values of one row of a batch.
///
/// Borrowed for the duration of a `bind` call; a callback that needs the
/// values later must clone them out.
#[derive(Debug, Clone, Copy)]
pub struct BatchBinding<'a> {
    vars: &'a Vars,
    batch: &'a Batch,
    row: usize,
}

impl<'a> BatchBinding<'a> {
    pub fn new(vars: &'a Vars, batch: &'a Batch, row: usize) -> Self {
        Self { vars, batch, row }
    }

    /// Value bound to `var`, `None` if unknown or unbound.
    pub fn get(&self, var: &str) -> Option<&'a Term> {
        let col = self.vars.index_of(var)?;
        self.batch.get(self.row, col)
    }

    pub fn is_bound(&self, var: &str) -> bool {
        self.get(var).is_some()
    }

    pub fn vars(&self) -> &'a Vars {
        self.vars
    }

    pub fn batch(&self) -> &'a Batch {
        self.batch
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn cells(&self) -> &'a [Cell] {
        self.batch.row(self.row)
    }
}
