//! Lightweight term and batch representations.
//!
//! The streaming operators never look inside a `Term`; they only count rows,
//! move batches around, and append rows through the methods below. A real
//! deployment swaps these for a dictionary-encoded columnar layout.

use std::fmt;

use serde::{Deserialize, Serialize};

/// RDF term placeholder. Compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Iri(String),
    Literal(String),
    Blank(String),
}

impl Term {
    pub fn iri(s: impl Into<String>) -> Self {
        Term::Iri(s.into())
    }

    pub fn lit(s: impl Into<String>) -> Self {
        Term::Literal(s.into())
    }

    pub fn blank(s: impl Into<String>) -> Self {
        Term::Blank(s.into())
    }

    /// Parse the N-Triples-like shorthand used by filters and tests:
    /// `<iri>`, `"literal"`, `_:label`. Anything else becomes a plain literal.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
            Term::Iri(inner.to_string())
        } else if let Some(label) = s.strip_prefix("_:") {
            Term::Blank(label.to_string())
        } else if let Some(inner) = s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            Term::Literal(inner.to_string())
        } else {
            Term::Literal(s.to_string())
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(s) => write!(f, "<{s}>"),
            Term::Literal(s) => write!(f, "\"{s}\""),
            Term::Blank(s) => write!(f, "_:{s}"),
        }
    }
}

/// One cell of a batch. `None` means the variable is unbound in that row.
pub type Cell = Option<Term>;

/// Row-major block of `rows x cols` cells.
///
/// Whoever holds a `Batch` value owns it. Recycling a batch means moving it
/// into a pool or a queue's spare slot; after that the previous holder has
/// nothing left to touch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Batch {
    cols: usize,
    cells: Vec<Cell>,
}

impl Batch {
    pub fn new(cols: usize) -> Self {
        Self {
            cols,
            cells: Vec::new(),
        }
    }

    pub fn with_capacity(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            cells: Vec::with_capacity(cols.saturating_mul(rows)),
        }
    }

    /// Zero columns, zero rows.
    pub fn empty() -> Self {
        Self::new(0)
    }

    /// A single row with every cell unbound. With zero columns this is the
    /// identity element of a join.
    pub fn singleton(cols: usize) -> Self {
        let mut b = Self::with_capacity(cols, 1);
        b.push_unbound_row();
        b
    }

    /// Build a batch from rows. Every row must have `cols` cells.
    pub fn from_rows<I, R>(cols: usize, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = Cell>,
    {
        let mut b = Self::new(cols);
        for row in rows {
            b.push_row(row);
        }
        b
    }

    pub fn rows(&self) -> usize {
        if self.cols == 0 {
            // zero-column rows are tracked through unit cells
            self.cells.len()
        } else {
            self.cells.len() / self.cols
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drop all rows and reshape to `cols` columns, keeping the allocation.
    pub fn clear(&mut self, cols: usize) {
        self.cells.clear();
        self.cols = cols;
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Term> {
        if col >= self.cols {
            return None;
        }
        self.cells.get(self.offset(row) + col)?.as_ref()
    }

    /// Cells of `row`. Zero-column batches yield an empty slice.
    pub fn row(&self, row: usize) -> &[Cell] {
        if self.cols == 0 || row >= self.rows() {
            return &[];
        }
        let start = self.offset(row);
        &self.cells[start..start + self.cols]
    }

    pub fn push_row<R: IntoIterator<Item = Cell>>(&mut self, row: R) {
        if self.cols == 0 {
            self.cells.push(None);
            return;
        }
        let before = self.cells.len();
        self.cells.extend(row.into_iter().take(self.cols));
        // pad short rows so the row-major layout never skews
        let pushed = self.cells.len() - before;
        self.cells
            .extend(std::iter::repeat(None).take(self.cols - pushed));
    }

    pub fn push_unbound_row(&mut self) {
        if self.cols == 0 {
            self.cells.push(None);
        } else {
            self.cells
                .extend(std::iter::repeat(None).take(self.cols));
        }
    }

    /// Append one row of `other`. Column counts must match.
    pub fn put_row(&mut self, other: &Batch, row: usize) {
        debug_assert_eq!(self.cols, other.cols, "put_row across shapes");
        if self.cols == 0 {
            self.cells.push(None);
        } else {
            self.cells.extend_from_slice(other.row(row));
        }
    }

    /// Append every row of `other`. Column counts must match.
    pub fn put(&mut self, other: &Batch) {
        debug_assert_eq!(self.cols, other.cols, "put across shapes");
        self.cells.extend_from_slice(&other.cells);
    }

    /// Move every row of `other` into `self`, leaving `other` empty but with
    /// its allocation intact so it can be reused.
    pub fn append(&mut self, other: &mut Batch) {
        debug_assert_eq!(self.cols, other.cols, "append across shapes");
        self.cells.append(&mut other.cells);
    }

    /// Keep only the rows whose `keep` entry is `true`, in place. Rows past
    /// the end of `keep` are dropped.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let kept = |r: usize| keep.get(r).copied().unwrap_or(false);
        let rows = self.rows();
        if self.cols == 0 {
            let n = (0..rows).filter(|&r| kept(r)).count();
            self.cells.truncate(n);
            return;
        }
        let cols = self.cols;
        let mut write = 0;
        for r in 0..rows {
            if !kept(r) {
                continue;
            }
            if write != r {
                for c in 0..cols {
                    self.cells.swap(write * cols + c, r * cols + c);
                }
            }
            write += 1;
        }
        self.cells.truncate(write * cols);
    }

    /// Set one cell of the last row. Used by mergers while building rows.
    pub(crate) fn push_cell(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    /// Iterate over rows as slices.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[Cell]> + '_ {
        (0..self.rows()).map(move |r| self.row(r))
    }

    /// Copy rows out as owned vectors (used by row-at-a-time views and tests).
    pub fn to_rows(&self) -> Vec<Vec<Cell>> {
        self.iter_rows().map(|r| r.to_vec()).collect()
    }

    fn offset(&self, row: usize) -> usize {
        row * self.cols
    }
}
