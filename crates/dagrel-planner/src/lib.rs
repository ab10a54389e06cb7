#![forbid(unsafe_code)]
//! dagrel-planner: operator DAG → logical plan → optimized logical plan
//! → physical program.
//!
//! Design:
//! - `builder` binds every relation against its input schemas into the
//!   arena in `logical`; schemas and column lineage are derived, never
//!   stored on nodes.
//! - `rules` validates partitioner use and rewrites the plan (limit and
//!   filter pushdown, top-K fusion, per-key limit annotation).
//! - `physical` groups the surviving nodes into data-parallel stages.
//! - `dsl::yaml` reads operator DAG documents.
//!
//! Everything here fails with [`dagrel_core::Error`] compile-time codes; no
//! data is read.

mod binder;
pub mod builder;
pub mod dsl;
pub mod functions;
pub mod lineage;
pub mod logical;
pub mod physical;
pub mod rules;

use dagrel_core::config::EngineConfig;
use dagrel_core::dag::OpDag;
use dagrel_core::error::Result;

pub use builder::build;
pub use dsl::yaml::{parse_yaml_dag, ConfigOverrides, DslError, ParsedDag};
pub use logical::{LogicalOp, LogicalPlan};
pub use physical::{compile, PhysicalProgram, Stage, StageKind};
pub use rules::optimize;

/// Build, optimize and compile `dag`, collecting `targets` besides the stores.
pub fn plan(dag: &OpDag, targets: &[&str], config: &EngineConfig) -> Result<(LogicalPlan, PhysicalProgram)> {
    let logical = optimize(build(dag, targets)?)?;
    let program = compile(&logical, config)?;
    Ok((logical, program))
}
