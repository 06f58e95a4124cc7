//! Batch-shape adapters.
//!
//! A `Merger` knows, for every output column, which left and/or right column
//! feeds it. Joins use it to combine a left row with right rows; fan-in and
//! concat use the projection form to bring a source onto a shared schema.

use crate::schema::Vars;
use crate::types::{Batch, Cell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColSource {
    left: Option<usize>,
    right: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Merger {
    out_vars: Vars,
    sources: Vec<ColSource>,
    identity: bool,
}

impl Merger {
    /// Combine rows of `left` and `right` into `out`. A cell takes the left
    /// value when bound there, otherwise the right value.
    pub fn for_merge(left: &Vars, right: &Vars, out: &Vars) -> Self {
        let sources: Vec<ColSource> = out
            .iter()
            .map(|name| ColSource {
                left: left.index_of(name),
                right: right.index_of(name),
            })
            .collect();
        let identity = out == left
            && sources
                .iter()
                .enumerate()
                .all(|(i, s)| s.left == Some(i) && s.right.is_none());
        Self {
            out_vars: out.clone(),
            sources,
            identity,
        }
    }

    /// Project batches shaped by `input` onto `out`. Vars of `out` missing
    /// from `input` become unbound cells.
    pub fn projection(input: &Vars, out: &Vars) -> Self {
        Self::for_merge(input, &Vars::empty(), out)
    }

    /// True when left rows can be copied verbatim and there is no right side.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn out_vars(&self) -> &Vars {
        &self.out_vars
    }

    pub fn out_cols(&self) -> usize {
        self.sources.len()
    }

    /// Append the combination of `left[lrow]` and `right[rrow]` to `out`.
    pub fn merge_row(&self, out: &mut Batch, left: &Batch, lrow: usize, right: &Batch, rrow: usize) {
        self.push(out, left.row(lrow), right.row(rrow));
    }

    /// Append `left[lrow]` combined with every row of `right`.
    pub fn merge(&self, out: &mut Batch, left: &Batch, lrow: usize, right: &Batch) {
        for r in 0..right.rows() {
            self.merge_row(out, left, lrow, right, r);
        }
    }

    /// Append `left[lrow]` with every right-only column unbound.
    pub fn merge_left_only(&self, out: &mut Batch, left: &Batch, lrow: usize) {
        self.push(out, left.row(lrow), &[]);
    }

    /// Append every row of `input` projected onto the output schema.
    pub fn project(&self, out: &mut Batch, input: &Batch) {
        if self.identity {
            out.put(input);
            return;
        }
        for r in 0..input.rows() {
            self.push(out, input.row(r), &[]);
        }
    }

    /// Project `input` into a fresh batch, recycling nothing.
    pub fn project_owned(&self, input: &Batch) -> Batch {
        let mut out = Batch::with_capacity(self.out_cols(), input.rows());
        self.project(&mut out, input);
        out
    }

    fn push(&self, out: &mut Batch, left: &[Cell], right: &[Cell]) {
        debug_assert_eq!(out.cols(), self.sources.len(), "merge into foreign shape");
        if self.sources.is_empty() {
            out.push_unbound_row();
            return;
        }
        for src in &self.sources {
            let l = src.left.and_then(|i| left.get(i)).and_then(|c| c.as_ref());
            let r = src.right.and_then(|i| right.get(i)).and_then(|c| c.as_ref());
            out.push_cell(l.or(r).cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Term;

    fn lit(s: &str) -> Cell {
        Some(Term::lit(s))
    }

    #[test]
    fn merge_prefers_bound_left() {
        let l = Vars::new(["x", "y"]);
        let r = Vars::new(["y", "z"]);
        let out = l.union(&r);
        let m = Merger::for_merge(&l, &r, &out);

        let left = Batch::from_rows(2, vec![vec![lit("1"), None]]);
        let right = Batch::from_rows(2, vec![vec![lit("2"), lit("3")], vec![lit("4"), None]]);
        let mut dst = Batch::new(out.len());
        m.merge(&mut dst, &left, 0, &right);

        assert_eq!(dst.rows(), 2);
        assert_eq!(dst.row(0), &[lit("1"), lit("2"), lit("3")]);
        assert_eq!(dst.row(1), &[lit("1"), lit("4"), None]);

        let mut pad = Batch::new(out.len());
        m.merge_left_only(&mut pad, &left, 0);
        assert_eq!(pad.row(0), &[lit("1"), None, None]);
    }

    #[test]
    fn projection_identity_and_reorder() {
        let v = Vars::new(["a", "b"]);
        assert!(Merger::projection(&v, &v).is_identity());

        let swapped = Vars::new(["b", "c", "a"]);
        let p = Merger::projection(&v, &swapped);
        assert!(!p.is_identity());
        let input = Batch::from_rows(2, vec![vec![lit("a0"), lit("b0")]]);
        let out = p.project_owned(&input);
        assert_eq!(out.row(0), &[lit("b0"), None, lit("a0")]);
    }
}
