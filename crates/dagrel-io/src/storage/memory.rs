//! Process-local storage used by tests and `memory://` roots.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use dagrel_mem::error::{Error as MemError, Result as MemResult};
use dagrel_mem::Storage;

/// Map-backed storage; clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store text under `path`, for fixtures.
    pub fn put_str(&self, path: &str, text: &str) {
        self.data().insert(path.to_string(), text.as_bytes().to_vec());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.data().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.data().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

fn missing(path: &str) -> MemError {
    MemError::Storage(format!("path not found: {path}"))
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        self.data().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let data = self.data();
        let bytes = data.get(path).ok_or_else(|| missing(path))?;
        let start = offset as usize;
        let end = start.saturating_add(len);
        bytes.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
            MemError::Storage(format!(
                "range {start}..{end} outside '{path}' ({} bytes)",
                bytes.len()
            ))
        })
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        self.data().remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        Ok(self
            .data()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        let data = self.data();
        let bytes = data.get(path).ok_or_else(|| missing(path))?;
        Ok(bytes.len() as u64)
    }

    fn etag(&self, path: &str) -> MemResult<Option<String>> {
        Ok(self
            .data()
            .get(path)
            .map(|b| blake3::hash(b).to_hex().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_range_and_bounds() {
        let storage = MemoryStorage::new();
        storage.write("t/file", b"hello world").unwrap();
        assert_eq!(storage.read_range("t/file", 6, 5).unwrap(), b"world");
        assert!(storage.read_range("t/file", 6, 50).is_err());
        assert!(storage.read_range("nope", 0, 1).is_err());
        assert_eq!(storage.read_all("t/file").unwrap(), b"hello world");
    }

    #[test]
    fn list_is_sorted_by_prefix() {
        let storage = MemoryStorage::new();
        storage.put_str("dir/b", "2");
        storage.put_str("dir/a", "1");
        storage.put_str("other/c", "3");
        assert_eq!(storage.list("dir/").unwrap(), vec!["dir/a", "dir/b"]);
        storage.delete("dir/a").unwrap();
        assert!(!storage.contains("dir/a"));
        assert_eq!(storage.len(), 2);
    }
}
