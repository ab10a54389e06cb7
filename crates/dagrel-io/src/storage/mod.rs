//! Storage adapters implementing `dagrel_mem::Storage`.
//!
//! - `fs`: local filesystem (default).
//! - `memory`: process-local map, selected with the `memory://` scheme.

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use std::sync::Arc;

use dagrel_mem::Storage;

use crate::error::{Error, Result};

/// Pick a backend for a root such as `/tmp/spill`, `file:///tmp/spill`
/// or `memory://`.
pub fn build_storage(root: &str) -> Result<Arc<dyn Storage>> {
    match root.split_once("://").map(|(scheme, _)| scheme) {
        Some("memory") => Ok(Arc::new(MemoryStorage::new())),
        Some("file") | None => Ok(Arc::new(FsStorage::new())),
        Some(other) => Err(Error::Config(format!("unsupported storage scheme '{other}'"))),
    }
}

/// Strip a `file://` or `memory://` prefix.
pub fn strip_scheme(path: &str) -> &str {
    match path.split_once("://") {
        Some((_, rest)) => rest,
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_selection() {
        assert!(build_storage("/tmp/x").is_ok());
        assert!(build_storage("file:///tmp/x").is_ok());
        assert!(build_storage("memory://").is_ok());
        assert!(matches!(build_storage("s3://bucket"), Err(Error::Config(_))));
        assert_eq!(strip_scheme("file:///tmp/x"), "/tmp/x");
        assert_eq!(strip_scheme("t1"), "t1");
    }
}
