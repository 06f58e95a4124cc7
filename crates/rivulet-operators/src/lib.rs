#![deny(unsafe_code)]
//! rivulet-operators: the batch iterator contract and the streaming operators
//! built on it (concat, flat-map, processors, merge, scatter, bind).
//!
//! Design intent:
//! - Operators are synchronous pull iterators; only merge and scatter own
//!   threads, and those block solely on `BatchQueue` park/unpark.
//! - Batches move by value. Recycling hands a batch back to whoever can
//!   refill it; refusing a recycled batch is always legal.
//! - `unsafe` is confined to the queue slot (see `queue`).

pub mod failpoints;
pub mod metrics;
pub mod queue;
pub mod source;
pub mod traits;

pub mod concat;
pub mod filter;
pub mod flat_map;
pub mod processor;
pub mod project;

pub mod join;
pub mod merge;
pub mod scatter;

pub use concat::ConcatBatchIt;
pub use filter::FilterProcessor;
pub use flat_map::FlatMapBatchIt;
pub use join::{BindBatchIt, BindType, Binder};
pub use merge::MergeBatchIt;
pub use metrics::{CountingMetrics, JoinMetrics, NoopMetrics, TracingJoinMetrics};
pub use processor::{BatchConverter, BatchProcessor, ConverterBatchIt, ProcessorBatchIt};
pub use project::ProjectProcessor;
pub use queue::{BatchQueue, QueueReader, QueueState};
pub use scatter::{Scatter, ScatterConsumer};
pub use source::{EmptyBatchIt, FailingBatchIt, SingletonBatchIt, VecBatchIt};
pub use traits::{BatchIt, BatchItExt, BoxedBatchIt, CancelHandle, Rows};
