//! Record readers: storage bytes in, typed tuples out.
//!
//! A load names one or more comma-separated locations. A location that is a
//! directory (or a prefix with `/`-separated children) expands to its part
//! files in lexical order; locations themselves are read in listed order.
//!
//! [`RelationReader`] reads one part file per batch, so only the current
//! file's bytes are held while decoding.

pub mod bin;
pub mod text;

use std::collections::VecDeque;

use dagrel_core::codec::{coerce_tuple, CasterKind, LoadCaster};
use dagrel_core::dag::StorageFormat;
use dagrel_core::schema::Schema;
use dagrel_core::value::Tuple;
use dagrel_mem::Storage;

use crate::error::{Error, Result};
use crate::storage::strip_scheme;

pub const DEFAULT_DELIMITER: char = '\t';

/// Everything a reader needs to turn one load into tuples.
#[derive(Debug, Clone)]
pub struct LoadSpec {
    pub location: String,
    pub format: StorageFormat,
    pub delimiter: char,
    pub schema: Option<Schema>,
    pub caster: CasterKind,
}

impl LoadSpec {
    pub fn new(location: &str, format: StorageFormat) -> Self {
        Self {
            location: location.to_string(),
            format,
            delimiter: DEFAULT_DELIMITER,
            schema: None,
            caster: format.default_caster(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Split `a,b , c` into trimmed, non-empty locations.
pub fn split_locations(location: &str) -> Vec<String> {
    location
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Files backing one location.
pub fn resolve_paths(storage: &dyn Storage, location: &str) -> Result<Vec<String>> {
    let path = strip_scheme(location).trim_end_matches('/');
    let children = storage.list(&format!("{path}/"))?;
    if !children.is_empty() {
        return Ok(children);
    }
    match storage.size(path) {
        Ok(_) => Ok(vec![path.to_string()]),
        Err(_) => Err(Error::NotFound(location.to_string())),
    }
}

/// Lazy reader over the part files of one load.
pub struct RelationReader<'a> {
    storage: &'a dyn Storage,
    spec: &'a LoadSpec,
    paths: VecDeque<String>,
    caster: &'static dyn LoadCaster,
}

impl<'a> RelationReader<'a> {
    /// Resolve every location up front; no data is read until the first batch.
    pub fn open(storage: &'a dyn Storage, spec: &'a LoadSpec) -> Result<Self> {
        let locations = split_locations(&spec.location);
        if locations.is_empty() {
            return Err(Error::Config(format!("empty load location '{}'", spec.location)));
        }
        let mut paths = VecDeque::new();
        for location in &locations {
            paths.extend(resolve_paths(storage, location)?);
        }
        Ok(Self {
            storage,
            spec,
            paths,
            caster: spec.caster.caster(),
        })
    }

    /// Part files not yet read.
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }

    /// Decode the next part file, coerced to the declared schema.
    pub fn next_batch(&mut self) -> Result<Option<Vec<Tuple>>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let bytes = self.storage.read_all(&path)?;
        let mut rows = match self.spec.format {
            StorageFormat::Text => {
                let mut rows = Vec::new();
                text::decode(&bytes, self.spec.delimiter, &mut rows)?;
                rows
            }
            StorageFormat::Bin => bin::decode(&bytes)?,
        };
        if let Some(schema) = &self.spec.schema {
            rows = rows
                .into_iter()
                .map(|row| coerce_tuple(row, schema, self.caster))
                .collect();
        }
        tracing::debug!(path = %path, rows = rows.len(), "read part");
        Ok(Some(rows))
    }
}

impl Iterator for RelationReader<'_> {
    type Item = Result<Vec<Tuple>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

/// Read every location of a load, decode, and coerce to the declared schema.
pub fn read_relation(storage: &dyn Storage, spec: &LoadSpec) -> Result<Vec<Tuple>> {
    let mut rows = Vec::new();
    for batch in RelationReader::open(storage, spec)? {
        rows.extend(batch?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use dagrel_core::value::Value;

    #[test]
    fn split_trims_and_drops_empty() {
        assert_eq!(split_locations("t1, t2,,t3 "), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn directory_location_reads_parts_in_order() {
        let storage = MemoryStorage::new();
        storage.put_str("out/part-1", "b\n");
        storage.put_str("out/part-0", "a\n");
        let rows = read_relation(&storage, &LoadSpec::new("out", StorageFormat::Text)).unwrap();
        assert_eq!(
            rows,
            vec![
                Tuple::new(vec![Value::Bytes(b"a".to_vec())]),
                Tuple::new(vec![Value::Bytes(b"b".to_vec())]),
            ]
        );
    }

    #[test]
    fn reader_yields_one_batch_per_part() {
        let storage = MemoryStorage::new();
        storage.put_str("out/part-0", "1\n2\n");
        storage.put_str("out/part-1", "3\n");
        storage.put_str("more", "4\n");
        let spec = LoadSpec::new("out,more", StorageFormat::Text).with_schema("x:int".parse().unwrap());
        let mut reader = RelationReader::open(&storage, &spec).unwrap();
        assert_eq!(reader.remaining(), 3);

        let first = reader.next_batch().unwrap().unwrap();
        assert_eq!(first, vec![Tuple::new(vec![Value::Int(1)]), Tuple::new(vec![Value::Int(2)])]);
        assert_eq!(reader.remaining(), 2);

        // Data is only read when its batch is reached.
        storage.delete("more").unwrap();
        assert_eq!(reader.next().unwrap().unwrap(), vec![Tuple::new(vec![Value::Int(3)])]);
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn missing_location_is_an_error() {
        let storage = MemoryStorage::new();
        let err = read_relation(&storage, &LoadSpec::new("nope", StorageFormat::Text)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn declared_schema_pads_and_casts() {
        let storage = MemoryStorage::new();
        storage.put_str("t", "1\tx\n2\n");
        let schema: Schema = "a:int, b:chararray".parse().unwrap();
        let rows =
            read_relation(&storage, &LoadSpec::new("t", StorageFormat::Text).with_schema(schema))
                .unwrap();
        assert_eq!(rows[0], Tuple::new(vec![Value::Int(1), Value::Chars("x".into())]));
        assert_eq!(rows[1], Tuple::new(vec![Value::Int(2), Value::Null]));
    }
}
