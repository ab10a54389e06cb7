#![forbid(unsafe_code)]
//! dagrel-core: shared data model for the dagrel dataflow compiler.
//!
//! This crate owns the pieces every other layer agrees on:
//! - the nested [`schema`] model with merge/qualify/resolve,
//! - runtime [`value`]s (tuples, bags, maps) and the restartable [`bag`],
//! - the self-describing binary [`codec`] with coercion-on-read casters,
//! - the [`expr`] AST and the input operator [`dag`] handed over by a front end,
//! - bound [`plan`] fragments (inner plans, pipeline steps) shared by the
//!   planner and the operators,
//! - ids, config, hashing, run manifests and the memory-budget traits.
//!
//! No I/O, no planning and no evaluation lives here.

pub mod bag;
pub mod budget;
pub mod codec;
pub mod config;
pub mod dag;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod plan;
pub mod schema;
pub mod value;

pub use error::{Error, Result};

/// Engine version string recorded in run manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
