//! Partitioners: pure functions from a key to one of `n` buckets.
//!
//! Partitioners are looked up by name. They must be deterministic and
//! stateless, since a retried bucket has to see exactly the same rows.

use std::fmt;

use dagrel_core::value::{hash_key, Value};

use crate::traits::{OpError, Result};

pub trait Partitioner: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Bucket in `0..buckets` for `key`. `buckets` is at least 1.
    fn bucket(&self, key: &Value, buckets: usize) -> usize;
}

/// Default partitioner: stable blake3 hash of the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitioner;

impl Partitioner for HashPartitioner {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn bucket(&self, key: &Value, buckets: usize) -> usize {
        (hash_key(key) % buckets.max(1) as u64) as usize
    }
}

/// Integer keys modulo the bucket count; other keys fall back to hashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntModPartitioner;

impl Partitioner for IntModPartitioner {
    fn name(&self) -> &'static str {
        "int_mod"
    }

    fn bucket(&self, key: &Value, buckets: usize) -> usize {
        let n = buckets.max(1) as i64;
        let first = match key {
            Value::Tuple(t) => t.get(0),
            other => other,
        };
        match first.as_i64() {
            Some(v) => v.rem_euclid(n) as usize,
            None => HashPartitioner.bucket(key, buckets),
        }
    }
}

/// Every registered partitioner name.
pub const PARTITIONERS: &[&str] = &["hash", "int_mod"];

pub fn partitioner(name: &str) -> Result<Box<dyn Partitioner>> {
    match name {
        "hash" => Ok(Box::new(HashPartitioner)),
        "int_mod" => Ok(Box::new(IntModPartitioner)),
        other => Err(OpError::UnknownPartitioner(other.to_string())),
    }
}

/// The named partitioner, or hashing when none is given.
pub fn resolve(name: Option<&str>) -> Result<Box<dyn Partitioner>> {
    partitioner(name.unwrap_or("hash"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagrel_core::value::Tuple;

    #[test]
    fn registry_lookup() {
        for name in PARTITIONERS {
            assert_eq!(partitioner(name).unwrap().name(), *name);
        }
        assert!(matches!(
            partitioner("com.example.Custom"),
            Err(OpError::UnknownPartitioner(_))
        ));
    }

    #[test]
    fn int_mod_is_non_negative_and_stable() {
        let p = IntModPartitioner;
        assert_eq!(p.bucket(&Value::Int(-1), 3), 2);
        assert_eq!(p.bucket(&Value::Long(7), 3), 1);
        let key = Value::Tuple(Tuple::new(vec![Value::Int(4), Value::Chars("x".into())]));
        assert_eq!(p.bucket(&key, 3), 1);
    }

    #[test]
    fn hash_is_deterministic_and_in_range() {
        let p = HashPartitioner;
        let k = Value::Chars("key".into());
        let b = p.bucket(&k, 5);
        assert!(b < 5);
        assert_eq!(b, p.bucket(&k, 5));
        assert_eq!(p.bucket(&k, 0), 0);
    }
}
