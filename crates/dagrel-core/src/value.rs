//! Runtime values: scalars, tuples, bags and maps.
//!
//! Values carry a total order (mixed types order by a fixed type rank) so
//! they can be used directly as sort, group and join keys, and a stable
//! blake3 hash so partitioning is deterministic across runs and workers.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::bag::Bag;
use crate::schema::DataType;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bytes(Vec<u8>),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Chars(String),
    Boolean(bool),
    Tuple(Tuple),
    Bag(Bag),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// `None` for null.
    pub fn data_type(&self) -> Option<DataType> {
        let t = match self {
            Value::Null => return None,
            Value::Bytes(_) => DataType::ByteArray,
            Value::Int(_) => DataType::Int32,
            Value::Long(_) => DataType::Int64,
            Value::Float(_) => DataType::Float32,
            Value::Double(_) => DataType::Float64,
            Value::Chars(_) => DataType::CharArray,
            Value::Boolean(_) => DataType::Boolean,
            Value::Tuple(_) => DataType::Tuple,
            Value::Bag(_) => DataType::Bag,
            Value::Map(_) => DataType::Map,
        };
        Some(t)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Rank used to order values of different types.
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int(_) => 2,
            Value::Long(_) => 3,
            Value::Float(_) => 4,
            Value::Double(_) => 5,
            Value::Bytes(_) => 6,
            Value::Chars(_) => 7,
            Value::Map(_) => 8,
            Value::Tuple(_) => 9,
            Value::Bag(_) => 10,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Chars(s) => Some(s),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bag(&self) -> Option<&Bag> {
        match self {
            Value::Bag(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Value::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// Feed a type-tagged, stable encoding of this value into `hasher`.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[self.type_rank()]);
        match self {
            Value::Null => {}
            Value::Bytes(b) => {
                hasher.update(&(b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
            Value::Int(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Value::Long(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Value::Float(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::Double(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::Chars(s) => {
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Boolean(b) => {
                hasher.update(&[*b as u8]);
            }
            Value::Tuple(t) => t.hash_into(hasher),
            Value::Bag(bag) => {
                let mut rows = bag.snapshot();
                rows.sort();
                hasher.update(&(rows.len() as u64).to_le_bytes());
                for row in &rows {
                    row.hash_into(hasher);
                }
            }
            Value::Map(m) => {
                hasher.update(&(m.len() as u64).to_le_bytes());
                for (k, v) in m {
                    hasher.update(k.as_bytes());
                    v.hash_into(hasher);
                }
            }
        }
    }

    /// Rough in-memory footprint, used for budget accounting.
    pub fn estimated_size(&self) -> usize {
        let base = std::mem::size_of::<Value>();
        match self {
            Value::Bytes(b) => base + b.len(),
            Value::Chars(s) => base + s.len(),
            Value::Tuple(t) => base + t.estimated_size(),
            Value::Bag(b) => base + b.estimated_size(),
            Value::Map(m) => {
                base + m
                    .iter()
                    .map(|(k, v)| k.len() + v.estimated_size())
                    .sum::<usize>()
            }
            _ => base,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Chars(a), Chars(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            (Tuple(a), Tuple(b)) => a.cmp(b),
            (Bag(a), Bag(b)) => a.cmp(b),
            // Mixed types: order by type rank
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut h = blake3::Hasher::new();
        self.hash_into(&mut h);
        state.write(h.finalize().as_bytes());
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Chars(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Tuple(t) => write!(f, "{t}"),
            Value::Bag(b) => write!(f, "{b}"),
            Value::Map(m) => {
                f.write_str("[")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k}#{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Chars(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Tuple> for Value {
    fn from(v: Tuple) -> Self {
        Value::Tuple(v)
    }
}

impl From<Bag> for Value {
    fn from(v: Bag) -> Self {
        Value::Bag(v)
    }
}

/// Fixed-arity, ordered record. Immutable once emitted downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple(pub Vec<Value>);

static NULL: Value = Value::Null;

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field at `idx`; out-of-range positions read as null.
    pub fn get(&self, idx: usize) -> &Value {
        self.0.get(idx).unwrap_or(&NULL)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn push(&mut self, v: Value) {
        self.0.push(v);
    }

    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut values = Vec::with_capacity(self.len() + other.len());
        values.extend(self.0.iter().cloned());
        values.extend(other.0.iter().cloned());
        Tuple(values)
    }

    pub fn project(&self, cols: &[usize]) -> Tuple {
        Tuple(cols.iter().map(|&c| self.get(c).clone()).collect())
    }

    /// Tuple of `arity` nulls (outer-join padding).
    pub fn nulls(arity: usize) -> Tuple {
        Tuple(vec![Value::Null; arity])
    }

    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.0.len() as u64).to_le_bytes());
        for v in &self.0 {
            v.hash_into(hasher);
        }
    }

    pub fn estimated_size(&self) -> usize {
        self.0.iter().map(Value::estimated_size).sum()
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(v: Vec<Value>) -> Self {
        Tuple(v)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

/// One sort column and its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: usize) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// Compare two rows on `keys`, honoring per-key direction.
pub fn compare_rows(a: &Tuple, b: &Tuple, keys: &[SortKey]) -> Ordering {
    for k in keys {
        let ord = a.get(k.column).cmp(b.get(k.column));
        let ord = if k.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable 64-bit hash of a key, used by hash partitioners.
pub fn hash_key(key: &Value) -> u64 {
    let mut h = blake3::Hasher::new();
    key.hash_into(&mut h);
    let out = h.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&out.as_bytes()[0..8]);
    u64::from_le_bytes(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_dataflow_notation() {
        let inner = Bag::from_tuples(vec![Tuple::new(vec![1.into(), 1.into()])]);
        let other = Bag::from_tuples(vec![Tuple::new(vec![1.into(), 2.into(), 3.into()])]);
        let t = Tuple::new(vec![1.into(), inner.into(), other.into()]);
        assert_eq!(t.to_string(), "(1,{(1,1)},{(1,2,3)})");

        let mut m = BTreeMap::new();
        m.insert("key".to_string(), Value::Bytes(b"value".to_vec()));
        let t = Tuple::new(vec![Value::Map(m), Bag::empty().into(), Value::Null]);
        assert_eq!(t.to_string(), "([key#value],{},)");
    }

    #[test]
    fn mixed_types_order_by_rank() {
        let mut vals = vec![Value::from("a"), Value::Int(3), Value::Null, Value::Long(1)];
        vals.sort();
        assert_eq!(
            vals,
            vec![Value::Null, Value::Int(3), Value::Long(1), Value::from("a")]
        );
    }

    #[test]
    fn bag_equality_ignores_order() {
        let a = Bag::from_tuples(vec![Tuple::new(vec![1.into()]), Tuple::new(vec![2.into()])]);
        let b = Bag::from_tuples(vec![Tuple::new(vec![2.into()]), Tuple::new(vec![1.into()])]);
        assert_eq!(Value::Bag(a.clone()), Value::Bag(b.clone()));
        assert_eq!(hash_key(&Value::Bag(a)), hash_key(&Value::Bag(b)));
    }

    #[test]
    fn sort_desc_and_hash_are_deterministic() {
        let mut rows: Vec<Tuple> = [3, 1, 2]
            .iter()
            .map(|&v| Tuple::new(vec![Value::Int(v)]))
            .collect();
        rows.sort_by(|a, b| compare_rows(a, b, &[SortKey::desc(0)]));
        let got: Vec<_> = rows.iter().map(|r| r.get(0).clone()).collect();
        assert_eq!(got, vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
        assert_eq!(hash_key(&Value::Int(7)), hash_key(&Value::Int(7)));
        assert_ne!(hash_key(&Value::Int(7)), hash_key(&Value::Long(7)));
    }
}
