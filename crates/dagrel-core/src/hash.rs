//! Stable hashing helpers for plans, manifests and output digests.

use blake3::Hasher;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    let out = h.finalize();
    Hash256(out.into())
}

pub fn hash_str(s: &str) -> Hash256 {
    hash_bytes(s.as_bytes())
}

/// Digest over a sequence of rows, order-sensitive.
pub fn hash_rows<'a>(rows: impl IntoIterator<Item = &'a crate::value::Tuple>) -> Hash256 {
    let mut h = Hasher::new();
    for row in rows {
        row.hash_into(&mut h);
    }
    Hash256(h.finalize().into())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v).map_err(|e| crate::error::Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Tuple, Value};

    #[test]
    fn row_digest_is_order_sensitive() {
        let a = Tuple::new(vec![Value::Int(1)]);
        let b = Tuple::new(vec![Value::Int(2)]);
        assert_eq!(hash_rows([&a, &b]), hash_rows([&a, &b]));
        assert_ne!(hash_rows([&a, &b]), hash_rows([&b, &a]));
        assert_eq!(hash_str("x").to_hex().len(), 64);
    }
}
