#![forbid(unsafe_code)]
//! dagrel: a dataflow relational engine.
//!
//! Re-exports the workspace crates under one name. A typical run:
//!
//! ```no_run
//! use std::sync::Arc;
//! use dagrel::dagrel_core::config::EngineConfig;
//! use dagrel::dagrel_core::dag::{OpDag, OpSpec, StorageFormat};
//! use dagrel::dagrel_exec::Engine;
//! use dagrel::dagrel_io::MemoryStorage;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! storage.put_str("in", "1\n2\n");
//! let mut dag = OpDag::new();
//! dag.push("A", OpSpec::load("in", Some("x:int")));
//! dag.push("S", OpSpec::store("A", "out", StorageFormat::Text));
//! let engine = Engine::new(EngineConfig::default(), storage).unwrap();
//! let manifest = engine.run(&dag).unwrap();
//! println!("{}", manifest.plan_hash);
//! ```

pub use dagrel_core;
pub use dagrel_exec;
pub use dagrel_io;
pub use dagrel_mem;
pub use dagrel_operators;
pub use dagrel_planner;

pub use dagrel_core::{Error, Result};
pub use dagrel_exec::{Engine, ExecError};
