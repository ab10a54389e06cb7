#![forbid(unsafe_code)]
//! dagrel-io: storage backends plus record readers and writers.
//!
//! Two record formats are supported: delimited text (every field loads as a
//! bytearray, later coerced through a caster) and the self-describing binary
//! tuple format from `dagrel-core::codec`. A location may name several
//! comma-separated paths; they are read in the listed order.

pub mod error;
pub mod readers;
pub mod storage;
pub mod writers;

pub use error::{Error, Result};
pub use readers::{read_relation, split_locations, LoadSpec, RelationReader};
pub use storage::{build_storage, FsStorage, MemoryStorage};
pub use writers::{write_relation, StoreSpec};
