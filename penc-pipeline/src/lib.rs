//! Stage runtime and pipeline graph for the penc encoder.
//!
//! Provides the machinery that turns a set of [`penc_core::ResourcePool`]s
//! and stage processors into a running multi-threaded pipeline:
//!
//! - [`PipelineBuilder`] registers pools (edges) and stages (nodes)
//! - [`PipelineGraph`] owns the running worker threads, propagates the first
//!   stage failure and performs the orderly teardown
//! - [`Processor`] is the per-input work of a stage
//! - [`ReorderBuffer`] restores sequence order behind parallel stages
//!
//! # Example
//!
//! ```
//! use penc_core::Resource;
//! use penc_pipeline::{PipelineBuilder, QueueRef, Result};
//!
//! let mut builder = PipelineBuilder::new();
//! let numbers = builder.add_pool("numbers", 4, 1, |_| 0u32)?;
//! let squares = builder.add_pool("squares", 4, 1, |_| 0u32)?;
//!
//! let out = squares.clone();
//! builder.add_stage("square", QueueRef::from(&numbers), 2, move |_| {
//!     let out = out.clone();
//!     move |n: Resource<u32>| -> Result<()> {
//!         let mut sq = out.acquire()?;
//!         *sq = *n * *n;
//!         out.post(sq)?;
//!         Ok(())
//!     }
//! })?;
//!
//! let graph = builder.start()?;
//! let mut n = numbers.acquire()?;
//! *n = 7;
//! numbers.post(n)?;
//! assert_eq!(*squares.dequeue(0)?, 49);
//! graph.drain_and_close()?;
//! # Ok::<(), penc_pipeline::PipelineError>(())
//! ```

mod error;
mod graph;
mod reorder;
mod stage;

pub use error::{PipelineError, Result};
pub use graph::{EdgeId, GraphState, PipelineBuilder, PipelineGraph};
pub use reorder::ReorderBuffer;
pub use stage::{Processor, QueueRef, StageId};
