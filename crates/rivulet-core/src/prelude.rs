//! Convenient re-exports for downstream crates.

pub use crate::binding::BatchBinding;
pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::id::{ConsumerId, IterId, SourceId};
pub use crate::merger::Merger;
pub use crate::schema::Vars;
pub use crate::timing::Timing;
pub use crate::types::{Batch, Cell, Term};
