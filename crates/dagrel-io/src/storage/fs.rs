use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use blake3::Hasher;
use dagrel_mem::error::{Error as MemError, Result as MemResult};
use dagrel_mem::Storage;

fn storage_err(op: &str, path: &str, e: std::io::Error) -> MemError {
    MemError::Storage(format!("{op} '{path}': {e}"))
}

/// Local filesystem storage.
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        let p = Path::new(path);
        if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| storage_err("mkdir", path, e))?;
        }
        let mut f = File::create(p).map_err(|e| storage_err("create", path, e))?;
        f.write_all(bytes).map_err(|e| storage_err("write", path, e))?;
        f.flush().map_err(|e| storage_err("flush", path, e))?;
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let mut f = File::open(path).map_err(|e| storage_err("open", path, e))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| storage_err("seek", path, e))?;
        let mut buf = Vec::with_capacity(len);
        f.take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| storage_err("read", path, e))?;
        if buf.len() != len {
            return Err(MemError::Storage(format!(
                "short read '{path}': wanted {len} bytes at {offset}, got {}",
                buf.len()
            )));
        }
        Ok(buf)
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("delete", path, e)),
        }
    }

    /// Files under a directory prefix (recursively), sorted. A prefix that
    /// names a file lists just that file.
    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        let root = Path::new(prefix);
        let mut results = Vec::new();
        if root.is_file() {
            results.push(prefix.to_string());
            return Ok(results);
        }
        if !root.is_dir() {
            return Ok(results);
        }

        fn visit(dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    visit(&path, out)?;
                } else if let Some(s) = path.to_str() {
                    out.push(s.to_string());
                }
            }
            Ok(())
        }
        visit(root, &mut results).map_err(|e| storage_err("list", prefix, e))?;
        results.sort();
        Ok(results)
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        let meta = fs::metadata(path).map_err(|e| storage_err("stat", path, e))?;
        if meta.is_dir() {
            return Err(MemError::Storage(format!("'{path}' is a directory")));
        }
        Ok(meta.len())
    }

    /// Pseudo etag: blake3 over size, mtime and path.
    fn etag(&self, path: &str) -> MemResult<Option<String>> {
        let Ok(meta) = fs::metadata(path) else {
            return Ok(None);
        };
        let mut h = Hasher::new();
        h.update(&meta.len().to_be_bytes());
        if let Some(d) = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        {
            h.update(&d.as_secs().to_be_bytes());
            h.update(&d.subsec_nanos().to_be_bytes());
        }
        h.update(path.as_bytes());
        Ok(Some(h.finalize().to_hex().to_string()))
    }
}
