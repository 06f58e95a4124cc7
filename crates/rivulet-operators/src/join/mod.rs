//! Nested-loop bind joins.

pub mod bind;

use std::fmt;
use std::str::FromStr;

use rivulet_core::prelude::{Error, Vars};
use serde::{Deserialize, Serialize};

pub use bind::{BindBatchIt, Binder, FnBinder};

/// How the rows a bound right side yields combine with the left row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindType {
    Join,
    LeftJoin,
    Exists,
    NotExists,
    Minus,
}

impl BindType {
    pub const ALL: [BindType; 5] = [
        BindType::Join,
        BindType::LeftJoin,
        BindType::Exists,
        BindType::NotExists,
        BindType::Minus,
    ];

    /// Whether right-hand columns reach the output.
    pub fn projects_right(self) -> bool {
        matches!(self, BindType::Join | BindType::LeftJoin)
    }

    /// Output schema for `left` bound against `right`.
    pub fn out_vars(self, left: &Vars, right: &Vars) -> Vars {
        if self.projects_right() {
            left.union(right)
        } else {
            left.clone()
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BindType::Join => "JOIN",
            BindType::LeftJoin => "LEFT_JOIN",
            BindType::Exists => "EXISTS",
            BindType::NotExists => "NOT_EXISTS",
            BindType::Minus => "MINUS",
        }
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        BindType::ALL
            .into_iter()
            .find(|b| b.as_str() == norm)
            .ok_or_else(|| Error::Bind(format!("unknown bind type '{}'", s)))
    }
}
