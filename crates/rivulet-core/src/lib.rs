#![forbid(unsafe_code)]
//! rivulet-core: terms, batches, variable schemas, mergers, timing, config, errors.
//!
//! Pure data and arithmetic. No threads and no I/O live here; the operators
//! crate builds the streaming machinery on top of these types.

pub mod binding;
pub mod config;
pub mod error;
pub mod id;
pub mod merger;
pub mod prelude;
pub mod schema;
pub mod timing;
pub mod types;

pub use error::{Error, Result};
