//! Spill manager for bags and sort runs that outgrow memory.
//!
//! Pages of tuples are written as framed segments (see [`segment`]) with a
//! blake3 checksum over header and payload. The payload uses the core binary
//! tuple codec so spilled rows keep their exact runtime types.

pub mod codec;
pub mod segment;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dagrel_core::codec::{decode_records, encode_records};
use dagrel_core::id::SpillId;
use dagrel_core::value::Tuple;

use crate::error::{Error, Result};

pub use codec::Codec;
pub use segment::{SegmentHeader, SegmentMeta, SegmentName, HEADER_LEN};

/// Abstract storage for spill segments and load/store locations.
///
/// Implemented by `dagrel-io::FsStorage` (local files) and
/// `dagrel-io::MemoryStorage` (tests).
pub trait Storage: Send + Sync {
    /// Write bytes to a path, replacing it. Creates parent directories.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes starting at `offset`.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Missing paths are not an error.
    fn delete(&self, path: &str) -> Result<()>;

    /// Paths under a prefix, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn size(&self, path: &str) -> Result<u64>;

    /// Content tag, if the backend has one.
    fn etag(&self, path: &str) -> Result<Option<String>>;

    /// Read a whole path.
    fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let len = self.size(path)?;
        self.read_range(path, 0, len as usize)
    }
}

pub struct SpillManager {
    storage: Arc<dyn Storage>,
    codec: Codec,
    root_dir: String,
    next_id: AtomicU64,
    bytes_written: AtomicU64,
    segments: Mutex<HashMap<SegmentName, SegmentMeta>>,
}

impl fmt::Debug for SpillManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillManager")
            .field("codec", &self.codec)
            .field("root_dir", &self.root_dir)
            .finish()
    }
}

impl SpillManager {
    pub fn new(storage: Arc<dyn Storage>, codec: Codec, root_dir: impl Into<String>) -> Self {
        Self {
            storage,
            codec,
            root_dir: root_dir.into(),
            next_id: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            segments: Mutex::new(HashMap::new()),
        }
    }

    fn segments(&self) -> MutexGuard<'_, HashMap<SegmentName, SegmentMeta>> {
        self.segments.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fresh id for one spilling bag or sort.
    pub fn next_spill_id(&self) -> SpillId {
        SpillId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Total segment bytes written, headers included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Encode, compress and write one page of rows.
    pub fn write_page(&self, id: SpillId, page: u32, rows: &[Tuple]) -> Result<SegmentMeta> {
        let raw = encode_records(rows)?;
        let payload = codec::compress(self.codec, &raw)?;
        let header = SegmentHeader {
            codec: self.codec,
            rows: rows.len() as u32,
            uncompressed_len: raw.len() as u64,
            compressed_len: payload.len() as u64,
        };

        let mut segment = header.to_bytes();
        segment.extend_from_slice(&payload);
        let checksum: [u8; 32] = blake3::hash(&segment).into();

        let name = SegmentName::new(id, page);
        let path = format!("{}/{}.seg", self.root_dir, name.0);
        self.storage.write(&path, &segment)?;
        self.bytes_written
            .fetch_add(segment.len() as u64, Ordering::Relaxed);
        tracing::debug!(segment = %name.0, rows = rows.len(), bytes = segment.len(), "spilled page");

        let meta = SegmentMeta {
            name: name.clone(),
            path,
            header,
            checksum,
        };
        self.segments().insert(name, meta.clone());
        Ok(meta)
    }

    /// Read a page back, verifying its checksum.
    pub fn read_page(&self, meta: &SegmentMeta) -> Result<Vec<Tuple>> {
        let total = HEADER_LEN + meta.header.compressed_len as usize;
        let segment = self.storage.read_range(&meta.path, 0, total)?;
        let checksum: [u8; 32] = blake3::hash(&segment).into();
        if checksum != meta.checksum {
            return Err(Error::ChecksumMismatch(meta.name.0.clone()));
        }
        let header = SegmentHeader::from_bytes(&segment)?;
        let raw = codec::decompress(header.codec, &segment[HEADER_LEN..])?;
        let rows = decode_records(&raw)?;
        if rows.len() != header.rows as usize {
            return Err(Error::Storage(format!(
                "segment {} holds {} rows, header says {}",
                meta.name.0,
                rows.len(),
                header.rows
            )));
        }
        Ok(rows)
    }

    pub fn delete_segment(&self, name: &SegmentName) -> Result<()> {
        let removed = self.segments().remove(name);
        if let Some(meta) = removed {
            self.storage.delete(&meta.path)?;
        }
        Ok(())
    }

    pub fn list_segments(&self) -> Vec<SegmentName> {
        let mut names: Vec<_> = self.segments().keys().cloned().collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dagrel_core::value::Value;
    use std::collections::BTreeMap;

    /// Minimal map-backed storage for unit tests in this crate.
    #[derive(Default)]
    pub(crate) struct MapStorage {
        pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl Storage for MapStorage {
        fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
            self.files.lock().unwrap().insert(path.into(), bytes.to_vec());
            Ok(())
        }
        fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
            let files = self.files.lock().unwrap();
            let data = files
                .get(path)
                .ok_or_else(|| Error::Storage(format!("missing {path}")))?;
            Ok(data[offset as usize..offset as usize + len].to_vec())
        }
        fn delete(&self, path: &str) -> Result<()> {
            self.files.lock().unwrap().remove(path);
            Ok(())
        }
        fn list(&self, prefix: &str) -> Result<Vec<String>> {
            let files = self.files.lock().unwrap();
            Ok(files.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
        }
        fn size(&self, path: &str) -> Result<u64> {
            let files = self.files.lock().unwrap();
            Ok(files.get(path).map(|d| d.len() as u64).unwrap_or(0))
        }
        fn etag(&self, _path: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn rows() -> Vec<Tuple> {
        vec![
            Tuple::new(vec![Value::Int(1), Value::Chars("a".into())]),
            Tuple::new(vec![Value::Null, Value::Double(2.5)]),
        ]
    }

    #[test]
    fn page_round_trip_keeps_types() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage, Codec::None, "spill");
        let id = mgr.next_spill_id();
        let meta = mgr.write_page(id, 0, &rows()).unwrap();
        assert_eq!(meta.path, "spill/spill0_page0.seg");
        assert_eq!(mgr.read_page(&meta).unwrap(), rows());
    }

    #[test]
    fn corrupted_page_is_detected() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage.clone(), Codec::None, "spill");
        let meta = mgr.write_page(mgr.next_spill_id(), 0, &rows()).unwrap();
        {
            let mut files = storage.files.lock().unwrap();
            let data = files.get_mut(&meta.path).unwrap();
            let last = data.len() - 1;
            data[last] ^= 0xff;
        }
        assert!(matches!(
            mgr.read_page(&meta),
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn delete_forgets_segment() {
        let storage = Arc::new(MapStorage::default());
        let mgr = SpillManager::new(storage.clone(), Codec::None, "spill");
        let meta = mgr.write_page(mgr.next_spill_id(), 0, &rows()).unwrap();
        mgr.delete_segment(&meta.name).unwrap();
        assert!(mgr.list_segments().is_empty());
        assert!(storage.files.lock().unwrap().is_empty());
    }
}
