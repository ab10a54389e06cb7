#![forbid(unsafe_code)]
//! dagrel-exec: runs a compiled physical program and emits a RunManifest.
//!
//! Stages run one after another in topological order. Within a stage every
//! bucket is independent; shuffles route rows with the partitioners from
//! `dagrel-operators`. Group bags and sort runs page out through the engine's
//! spill context once they outgrow their in-memory share.

pub mod error;
pub mod runtime;
pub mod shuffle;

pub use error::ExecError;
pub use runtime::{Engine, Execution};
