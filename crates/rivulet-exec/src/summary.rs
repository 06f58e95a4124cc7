//! Run summary emitted after draining an operator tree.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The root reported exhaustion.
    Completed,
    /// The root was cancelled before exhaustion.
    Cancelled,
    /// The engine stopped pulling after its row limit.
    Limited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,

    /// `BatchIt::name` of the root operator.
    pub root: String,

    /// Engine version string for provenance.
    pub engine_version: String,

    pub batches: u64,
    pub rows: u64,

    /// Largest batch seen, in rows.
    pub max_batch_rows: u64,

    /// Batches the root accepted back through `recycle`.
    pub recycled: u64,

    pub elapsed_us: u64,
    pub outcome: Outcome,
}

impl RunSummary {
    pub fn new(root: &str) -> Self {
        Self {
            id: RunId::new(),
            root: root.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            batches: 0,
            rows: 0,
            max_batch_rows: 0,
            recycled: 0,
            elapsed_us: 0,
            outcome: Outcome::Completed,
        }
    }

    pub(crate) fn record_batch(&mut self, rows: usize) {
        self.batches += 1;
        self.rows += rows as u64;
        self.max_batch_rows = self.max_batch_rows.max(rows as u64);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
