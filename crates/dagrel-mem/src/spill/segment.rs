//! Spill segment framing.
//!
//! Layout:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ rows: u32 ][ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes ... ]
//!
//! All integers are big-endian, like the tuple codec in the payload. The
//! blake3 checksum covers header and payload and is kept in [`SegmentMeta`].

use serde::{Deserialize, Serialize};

use dagrel_core::id::SpillId;

use super::Codec;
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x4447_5250; // "DGRP"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 4 + 8 + 8;

/// Upper bound on a single decoded page.
pub const MAX_PAGE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub codec: Codec,
    pub rows: u32,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

fn be_u32(b: &[u8]) -> u32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[..4]);
    u32::from_be_bytes(a)
}

fn be_u64(b: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    u64::from_be_bytes(a)
}

impl SegmentHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.push(self.codec as u8);
        out.push(0u8);
        out.extend_from_slice(&self.rows.to_be_bytes());
        out.extend_from_slice(&self.uncompressed_len.to_be_bytes());
        out.extend_from_slice(&self.compressed_len.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Storage("short segment header".into()));
        }
        let magic = be_u32(&bytes[0..4]);
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if magic != MAGIC || version != VERSION {
            return Err(Error::Storage(format!(
                "bad magic/version {magic:#x}/{version}"
            )));
        }
        let header = Self {
            codec: Codec::from_u8(bytes[6])?,
            rows: be_u32(&bytes[8..12]),
            uncompressed_len: be_u64(&bytes[12..20]),
            compressed_len: be_u64(&bytes[20..28]),
        };
        header.validate_sizes()?;
        Ok(header)
    }

    /// Reject headers that would force oversized allocations.
    fn validate_sizes(&self) -> Result<()> {
        if self.uncompressed_len > MAX_PAGE_BYTES || self.compressed_len > MAX_PAGE_BYTES {
            return Err(Error::Storage(format!(
                "segment sizes {}/{} exceed {MAX_PAGE_BYTES}",
                self.uncompressed_len, self.compressed_len
            )));
        }
        Ok(())
    }
}

/// Storage-relative name of a page: `spill<id>_page<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentName(pub String);

impl SegmentName {
    pub fn new(id: SpillId, page: u32) -> Self {
        SegmentName(format!("spill{}_page{}", id.get(), page))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: SegmentName,
    pub path: String,
    pub header: SegmentHeader,
    pub checksum: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_are_stable() {
        let h = SegmentHeader {
            codec: Codec::None,
            rows: 3,
            uncompressed_len: 40,
            compressed_len: 40,
        };
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..4], b"DGRP");
        assert_eq!(SegmentHeader::from_bytes(&bytes).unwrap(), h);
    }

    #[test]
    fn oversized_header_rejected() {
        let h = SegmentHeader {
            codec: Codec::None,
            rows: 1,
            uncompressed_len: MAX_PAGE_BYTES + 1,
            compressed_len: 1,
        };
        assert!(SegmentHeader::from_bytes(&h.to_bytes()).is_err());
    }
}
