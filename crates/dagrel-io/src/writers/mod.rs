//! Record writers: tuples out to a single storage location.

pub mod bin;
pub mod text;

use dagrel_core::dag::StorageFormat;
use dagrel_core::value::Tuple;
use dagrel_mem::Storage;

use crate::error::Result;
use crate::readers::DEFAULT_DELIMITER;
use crate::storage::strip_scheme;

#[derive(Debug, Clone)]
pub struct StoreSpec {
    pub location: String,
    pub format: StorageFormat,
    pub delimiter: char,
}

impl StoreSpec {
    pub fn new(location: &str, format: StorageFormat) -> Self {
        Self {
            location: location.to_string(),
            format,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

/// Encode `rows` and write them, replacing anything at the location.
/// Returns the number of bytes written.
pub fn write_relation(storage: &dyn Storage, spec: &StoreSpec, rows: &[Tuple]) -> Result<u64> {
    let bytes = match spec.format {
        StorageFormat::Text => text::encode(rows, spec.delimiter)?,
        StorageFormat::Bin => bin::encode(rows)?,
    };
    let path = strip_scheme(&spec.location);
    storage.write(path, &bytes)?;
    tracing::debug!(path = %path, rows = rows.len(), bytes = bytes.len(), "stored relation");
    Ok(bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::{read_relation, LoadSpec};
    use crate::storage::MemoryStorage;
    use dagrel_core::value::Value;

    #[test]
    fn bin_store_preserves_types() {
        let storage = MemoryStorage::new();
        let rows = vec![Tuple::new(vec![Value::Int(1), Value::Chars("a".into()), Value::Null])];
        write_relation(&storage, &StoreSpec::new("out.bin", StorageFormat::Bin), &rows).unwrap();
        let back = read_relation(&storage, &LoadSpec::new("out.bin", StorageFormat::Bin)).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn fs_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let loc = format!("{}/nested/out.txt", dir.path().display());
        let storage = crate::storage::FsStorage::new();
        let rows = vec![Tuple::new(vec![Value::Int(7)])];
        let n = write_relation(&storage, &StoreSpec::new(&loc, StorageFormat::Text), &rows).unwrap();
        assert_eq!(n, 2);
        assert_eq!(std::fs::read_to_string(&loc).unwrap(), "7\n");
    }
}
