#![forbid(unsafe_code)]
//! dagrel-operators: expression evaluation and physical operators.
//!
//! Design intent:
//! - Pure and synchronous. Every operator is a deterministic function of
//!   the partition or bucket it is handed, so the engine may retry freely.
//! - Buffers that grow with the data (group bags, sort runs) go through the
//!   `dagrel-mem` spill context carried by [`EvalContext`].
//! - Map-side steps live in [`pipeline`]; shuffle-side operators implement
//!   [`Operator`] over [`Keyed`] rows of one bucket.

pub mod builtins;
pub mod cross;
pub mod eval;
pub mod join;
pub mod package;
pub mod partition;
pub mod pipeline;
pub mod sample;
pub mod sort;
pub mod traits;
pub mod union;

pub use eval::{eval, eval_key, eval_predicate};
pub use partition::{partitioner, Partitioner};
pub use pipeline::run_pipeline;
pub use traits::{is_null_key, EvalContext, Keyed, OpError, Operator, Result};
