//! Filter processor with simple row predicates.
//!
//! Supports expressions of the form `?var OP term` where OP ∈ {==, !=}, plus
//! `bound(?var)` and `!bound(?var)`. Anything richer goes through
//! [`FilterProcessor::from_fn`].

use std::fmt;

use rivulet_core::prelude::{Batch, BatchBinding, Error, Result, Term, Vars};

use crate::processor::BatchProcessor;

type RowPredicate = Box<dyn Fn(&BatchBinding<'_>) -> bool + Send>;

enum Predicate {
    Eq(usize, Term),
    Ne(usize, Term),
    Bound(usize),
    NotBound(usize),
    Custom(RowPredicate),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(c, t) => write!(f, "col{c} == {t}"),
            Predicate::Ne(c, t) => write!(f, "col{c} != {t}"),
            Predicate::Bound(c) => write!(f, "bound(col{c})"),
            Predicate::NotBound(c) => write!(f, "!bound(col{c})"),
            Predicate::Custom(_) => f.write_str("<fn>"),
        }
    }
}

/// Drops the rows of each batch that fail a predicate, in place.
#[derive(Debug)]
pub struct FilterProcessor {
    vars: Vars,
    predicate: Predicate,
    keep: Vec<bool>,
    dropped: u64,
}

impl FilterProcessor {
    /// Parse a predicate against the input schema `vars`.
    pub fn parse(vars: &Vars, expr: &str) -> Result<Self> {
        let predicate = parse_predicate(vars, expr)?;
        Ok(Self::with_predicate(vars, predicate))
    }

    /// Keep the rows for which `f` returns `true`.
    pub fn from_fn<F>(vars: &Vars, f: F) -> Self
    where
        F: Fn(&BatchBinding<'_>) -> bool + Send + 'static,
    {
        Self::with_predicate(vars, Predicate::Custom(Box::new(f)))
    }

    fn with_predicate(vars: &Vars, predicate: Predicate) -> Self {
        Self {
            vars: vars.clone(),
            predicate,
            keep: Vec::new(),
            dropped: 0,
        }
    }

    /// Rows removed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn eval(&self, batch: &Batch, row: usize) -> bool {
        match &self.predicate {
            Predicate::Eq(c, t) => batch.get(row, *c) == Some(t),
            // unbound compares as an error in SPARQL, which filters the row out
            Predicate::Ne(c, t) => batch.get(row, *c).is_some_and(|v| v != t),
            Predicate::Bound(c) => batch.get(row, *c).is_some(),
            Predicate::NotBound(c) => batch.get(row, *c).is_none(),
            Predicate::Custom(f) => f(&BatchBinding::new(&self.vars, batch, row)),
        }
    }
}

impl BatchProcessor for FilterProcessor {
    fn process(&mut self, mut batch: Batch) -> Result<Batch> {
        let mut keep = std::mem::take(&mut self.keep);
        keep.clear();
        keep.extend((0..batch.rows()).map(|r| self.eval(&batch, r)));
        let before = batch.rows();
        batch.retain_rows(&keep);
        self.dropped += (before - batch.rows()) as u64;
        self.keep = keep;
        Ok(batch)
    }

    fn name(&self) -> &'static str {
        "filter"
    }
}

/// Parse `?x == <iri>`, `?x != "lit"`, `bound(?x)` or `!bound(?x)`.
fn parse_predicate(vars: &Vars, expr: &str) -> Result<Predicate> {
    let expr = expr.trim();
    let column = |name: &str| {
        vars.index_of(name.trim())
            .ok_or_else(|| Error::Schema(format!("unknown variable '{}' in {}", name.trim(), vars)))
    };

    if let Some(inner) = call_arg(expr, "!bound") {
        return Ok(Predicate::NotBound(column(inner)?));
    }
    if let Some(inner) = call_arg(expr, "bound") {
        return Ok(Predicate::Bound(column(inner)?));
    }

    for op in ["==", "!="] {
        if let Some(pos) = expr.find(op) {
            let col = column(&expr[..pos])?;
            let term = Term::parse(expr[pos + op.len()..].trim());
            return Ok(if op == "==" {
                Predicate::Eq(col, term)
            } else {
                Predicate::Ne(col, term)
            });
        }
    }

    Err(Error::Schema(format!("unparseable predicate: {}", expr)))
}

fn call_arg<'a>(expr: &'a str, func: &str) -> Option<&'a str> {
    expr.strip_prefix(func)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}
