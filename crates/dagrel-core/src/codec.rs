//! Binary tuple format and coercion-on-read.
//!
//! Every field is a type tag byte followed by its payload:
//!
//! | tag | type | payload |
//! |---|---|---|
//! | 1 | null | none |
//! | 5 | boolean | 1 byte |
//! | 10 / 15 | int / long | 4 / 8 bytes, big-endian |
//! | 20 / 25 | float / double | IEEE-754 bits, big-endian |
//! | 50 / 55 | bytearray / chararray | u32 length + bytes |
//! | 100 | map | u32 count + (u32 key length + key + field)* |
//! | 110 | tuple | u32 arity + field* |
//! | 120 | bag | u64 count + (tuple payload)* |
//!
//! A stored record is one tuple field. Records are concatenated back to back.
//!
//! A chararray payload that is not valid UTF-8 decodes as null, the same
//! answer coercion gives. Framing errors (bad tags, truncated payloads) still
//! fail the record.
//!
//! Coercion never fails: a [`LoadCaster`] turns untyped byte payloads into the
//! declared type and answers `Value::Null` for anything it cannot convert.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bag::Bag;
use crate::error::{Error, Result};
use crate::schema::{DataType, Field, Schema};
use crate::value::{Tuple, Value};

pub mod tag {
    pub const NULL: u8 = 1;
    pub const BOOLEAN: u8 = 5;
    pub const INT: u8 = 10;
    pub const LONG: u8 = 15;
    pub const FLOAT: u8 = 20;
    pub const DOUBLE: u8 = 25;
    pub const BYTEARRAY: u8 = 50;
    pub const CHARARRAY: u8 = 55;
    pub const MAP: u8 = 100;
    pub const TUPLE: u8 = 110;
    pub const BAG: u8 = 120;
}

pub fn encode_value(buf: &mut Vec<u8>, v: &Value) -> Result<()> {
    match v {
        Value::Null => buf.push(tag::NULL),
        Value::Boolean(b) => {
            buf.push(tag::BOOLEAN);
            buf.push(*b as u8);
        }
        Value::Int(i) => {
            buf.push(tag::INT);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::Long(i) => {
            buf.push(tag::LONG);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::Float(x) => {
            buf.push(tag::FLOAT);
            buf.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        Value::Double(x) => {
            buf.push(tag::DOUBLE);
            buf.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        Value::Bytes(b) => {
            buf.push(tag::BYTEARRAY);
            put_len_prefixed(buf, b)?;
        }
        Value::Chars(s) => {
            buf.push(tag::CHARARRAY);
            put_len_prefixed(buf, s.as_bytes())?;
        }
        Value::Map(m) => {
            buf.push(tag::MAP);
            put_u32(buf, m.len())?;
            for (k, v) in m {
                put_len_prefixed(buf, k.as_bytes())?;
                encode_value(buf, v)?;
            }
        }
        Value::Tuple(t) => encode_tuple(buf, t)?,
        Value::Bag(bag) => {
            buf.push(tag::BAG);
            buf.extend_from_slice(&(bag.len() as u64).to_be_bytes());
            for row in bag.iter() {
                put_tuple_payload(buf, &row?)?;
            }
        }
    }
    Ok(())
}

/// Encode a tuple field (tag + arity + fields).
pub fn encode_tuple(buf: &mut Vec<u8>, t: &Tuple) -> Result<()> {
    buf.push(tag::TUPLE);
    put_tuple_payload(buf, t)
}

pub fn encode_records<'a>(rows: impl IntoIterator<Item = &'a Tuple>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for row in rows {
        encode_tuple(&mut buf, row)?;
    }
    Ok(buf)
}

pub fn decode_records(bytes: &[u8]) -> Result<Vec<Tuple>> {
    let mut d = Decoder::new(bytes);
    let mut out = Vec::new();
    while !d.is_eof() {
        out.push(d.read_record()?);
    }
    Ok(out)
}

fn put_u32(buf: &mut Vec<u8>, n: usize) -> Result<()> {
    let n = u32::try_from(n).map_err(|_| Error::Codec(format!("length {n} exceeds u32")))?;
    buf.extend_from_slice(&n.to_be_bytes());
    Ok(())
}

fn put_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    put_u32(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn put_tuple_payload(buf: &mut Vec<u8>, t: &Tuple) -> Result<()> {
    put_u32(buf, t.len())?;
    for v in t.values() {
        encode_value(buf, v)?;
    }
    Ok(())
}

/// Cursor over an encoded byte stream.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| {
                Error::Codec(format!(
                    "truncated input: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.bytes.len().saturating_sub(self.pos)
                ))
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<usize> {
        Ok(u32::from_be_bytes(self.array()?) as usize)
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let n = self.read_u32()?;
        self.take(n)
    }

    fn read_tuple_payload(&mut self) -> Result<Tuple> {
        let arity = self.read_u32()?;
        let mut values = Vec::with_capacity(arity.min(1024));
        for _ in 0..arity {
            values.push(self.read_value()?);
        }
        Ok(Tuple::new(values))
    }

    pub fn read_value(&mut self) -> Result<Value> {
        let [t] = self.array::<1>()?;
        let v = match t {
            tag::NULL => Value::Null,
            tag::BOOLEAN => Value::Boolean(self.array::<1>()?[0] != 0),
            tag::INT => Value::Int(i32::from_be_bytes(self.array()?)),
            tag::LONG => Value::Long(i64::from_be_bytes(self.array()?)),
            tag::FLOAT => Value::Float(f32::from_bits(u32::from_be_bytes(self.array()?))),
            tag::DOUBLE => Value::Double(f64::from_bits(u64::from_be_bytes(self.array()?))),
            tag::BYTEARRAY => Value::Bytes(self.read_len_prefixed()?.to_vec()),
            tag::CHARARRAY => {
                let raw = self.read_len_prefixed()?;
                match std::str::from_utf8(raw) {
                    Ok(s) => Value::Chars(s.to_string()),
                    Err(e) => {
                        tracing::debug!(error = %e, len = raw.len(), "invalid utf-8 chararray read as null");
                        Value::Null
                    }
                }
            }
            tag::MAP => {
                let n = self.read_u32()?;
                let mut m = BTreeMap::new();
                for _ in 0..n {
                    let k = String::from_utf8_lossy(self.read_len_prefixed()?).into_owned();
                    let v = self.read_value()?;
                    m.insert(k, v);
                }
                Value::Map(m)
            }
            tag::TUPLE => Value::Tuple(self.read_tuple_payload()?),
            tag::BAG => {
                let n = u64::from_be_bytes(self.array()?) as usize;
                let mut rows = Vec::with_capacity(n.min(1024));
                for _ in 0..n {
                    rows.push(self.read_tuple_payload()?);
                }
                Value::Bag(Bag::from_tuples(rows))
            }
            other => {
                return Err(Error::Codec(format!(
                    "unknown type tag {other} at offset {}",
                    self.pos - 1
                )))
            }
        };
        Ok(v)
    }

    /// Read one stored record; it must be a tuple field.
    pub fn read_record(&mut self) -> Result<Tuple> {
        match self.read_value()? {
            Value::Tuple(t) => Ok(t),
            other => Err(Error::Codec(format!(
                "expected tuple record, found {:?}",
                other.data_type()
            ))),
        }
    }
}

/// Converts untyped byte payloads into declared types.
///
/// Implementations never fail; anything that cannot be converted is null.
pub trait LoadCaster: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn cast_bytes(&self, bytes: &[u8], target: &Field) -> Value;
}

/// Which caster a load uses for its byte-array fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CasterKind {
    #[default]
    Binary,
    Utf8,
}

impl CasterKind {
    pub fn caster(self) -> &'static dyn LoadCaster {
        match self {
            CasterKind::Binary => &BinaryCaster,
            CasterKind::Utf8 => &Utf8Caster,
        }
    }
}

/// Reinterprets the leading `sizeof(T)` bytes as `T`'s big-endian representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCaster;

fn leading<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes.get(..N)?);
    Some(out)
}

impl LoadCaster for BinaryCaster {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn cast_bytes(&self, bytes: &[u8], target: &Field) -> Value {
        let v = match target.data_type {
            DataType::ByteArray => Some(Value::Bytes(bytes.to_vec())),
            DataType::Int32 => leading::<4>(bytes).map(|b| Value::Int(i32::from_be_bytes(b))),
            DataType::Int64 => leading::<8>(bytes).map(|b| Value::Long(i64::from_be_bytes(b))),
            DataType::Float32 => {
                leading::<4>(bytes).map(|b| Value::Float(f32::from_bits(u32::from_be_bytes(b))))
            }
            DataType::Float64 => {
                leading::<8>(bytes).map(|b| Value::Double(f64::from_bits(u64::from_be_bytes(b))))
            }
            DataType::Boolean => leading::<1>(bytes).map(|b| Value::Boolean(b[0] != 0)),
            DataType::CharArray => std::str::from_utf8(bytes)
                .ok()
                .map(|s| Value::Chars(s.to_string())),
            DataType::Tuple | DataType::Bag | DataType::Map => {
                let mut d = Decoder::new(bytes);
                match d.read_value() {
                    Ok(v) if d.is_eof() && v.data_type() == Some(target.data_type) => {
                        Some(coerce(v, target, self))
                    }
                    _ => None,
                }
            }
        };
        v.unwrap_or_else(|| {
            tracing::debug!(target_type = %target.data_type, len = bytes.len(), "binary cast yielded null");
            Value::Null
        })
    }
}

/// Parses the textual rendering of values (`12`, `1.5`, `(a,b)`, `{(1)}`, `[k#v]`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Caster;

impl LoadCaster for Utf8Caster {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn cast_bytes(&self, bytes: &[u8], target: &Field) -> Value {
        let v = if target.data_type.is_complex() {
            TextParser::parse(bytes, target)
        } else {
            Some(parse_atom(bytes, target.data_type))
        };
        v.unwrap_or_else(|| {
            tracing::debug!(target_type = %target.data_type, "text cast yielded null");
            Value::Null
        })
    }
}

/// Parse an atomic text payload; unparsable input is null.
pub fn parse_atom(raw: &[u8], dt: DataType) -> Value {
    if dt == DataType::ByteArray {
        return Value::Bytes(raw.to_vec());
    }
    let Ok(text) = std::str::from_utf8(raw) else {
        return Value::Null;
    };
    parse_text(text, dt)
}

/// Convert text to `dt`; null when it does not fit.
pub fn parse_text(text: &str, dt: DataType) -> Value {
    let t = text.trim();
    let parsed = match dt {
        DataType::CharArray => Some(Value::Chars(text.to_string())),
        DataType::ByteArray => Some(Value::Bytes(text.as_bytes().to_vec())),
        DataType::Int32 => t
            .parse::<i32>()
            .ok()
            .or_else(|| {
                t.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
                    .map(|f| f as i32)
            })
            .map(Value::Int),
        DataType::Int64 => {
            let digits = t.strip_suffix(['L', 'l']).unwrap_or(t);
            digits
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    digits
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .map(Value::Long)
        }
        DataType::Float32 => t
            .strip_suffix(['F', 'f'])
            .unwrap_or(t)
            .parse::<f32>()
            .ok()
            .map(Value::Float),
        DataType::Float64 => t.parse::<f64>().ok().map(Value::Double),
        DataType::Boolean => match t.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Boolean(true)),
            "false" => Some(Value::Boolean(false)),
            _ => None,
        },
        DataType::Tuple | DataType::Bag | DataType::Map => {
            TextParser::parse(text.as_bytes(), &Field::unnamed(dt))
        }
    };
    parsed.unwrap_or(Value::Null)
}

/// Recursive-descent parser for complex text payloads.
///
/// Structural errors (unbalanced brackets, atom where a tuple is expected)
/// fail the whole value; atomic conversion failures only null that field.
struct TextParser<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> TextParser<'a> {
    fn parse(bytes: &'a [u8], target: &Field) -> Option<Value> {
        let mut p = TextParser { s: bytes, pos: 0 };
        let v = p.value(target, &[])?;
        (p.pos == p.s.len()).then_some(v)
    }

    fn peek(&self) -> Option<u8> {
        self.s.get(self.pos).copied()
    }

    fn eat(&mut self, c: u8) -> Option<()> {
        (self.peek()? == c).then(|| self.pos += 1)
    }

    fn value(&mut self, target: &Field, terms: &[u8]) -> Option<Value> {
        match target.data_type {
            DataType::Tuple => self.tuple(target.schema.as_ref()).map(Value::Tuple),
            DataType::Bag => self.bag(target.schema.as_ref()),
            DataType::Map => self.map(),
            dt => {
                let raw = self.atom(terms)?;
                Some(parse_atom(raw, dt))
            }
        }
    }

    fn tuple(&mut self, schema: Option<&Schema>) -> Option<Tuple> {
        self.eat(b'(')?;
        let mut values = Vec::new();
        if self.eat(b')').is_some() {
            return Some(Tuple::new(values));
        }
        loop {
            let unknown = Field::unnamed(DataType::ByteArray);
            let target = schema.and_then(|s| s.field(values.len())).unwrap_or(&unknown);
            values.push(self.value(target, b",)")?);
            match self.peek()? {
                b',' => self.pos += 1,
                b')' => {
                    self.pos += 1;
                    return Some(Tuple::new(values));
                }
                _ => return None,
            }
        }
    }

    fn bag(&mut self, element: Option<&Schema>) -> Option<Value> {
        self.eat(b'{')?;
        let mut rows = Vec::new();
        if self.eat(b'}').is_some() {
            return Some(Value::Bag(Bag::empty()));
        }
        loop {
            rows.push(self.tuple(element)?);
            match self.peek()? {
                b',' => self.pos += 1,
                b'}' => {
                    self.pos += 1;
                    return Some(Value::Bag(Bag::from_tuples(rows)));
                }
                _ => return None,
            }
        }
    }

    fn map(&mut self) -> Option<Value> {
        self.eat(b'[')?;
        let mut m = BTreeMap::new();
        if self.eat(b']').is_some() {
            return Some(Value::Map(m));
        }
        loop {
            let start = self.pos;
            while self.peek()? != b'#' {
                self.pos += 1;
            }
            let key = String::from_utf8_lossy(&self.s[start..self.pos]).into_owned();
            self.pos += 1;
            let v = self.value(&Field::unnamed(DataType::ByteArray), b",]")?;
            m.insert(key, v);
            match self.peek()? {
                b',' => self.pos += 1,
                b']' => {
                    self.pos += 1;
                    return Some(Value::Map(m));
                }
                _ => return None,
            }
        }
    }

    /// Raw bytes up to the next terminator outside brackets.
    fn atom(&mut self, terms: &[u8]) -> Option<&'a [u8]> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                b'(' | b'{' | b'[' => depth += 1,
                b')' | b'}' | b']' if depth > 0 => depth -= 1,
                c if depth == 0 && terms.contains(&c) => break,
                b')' | b'}' | b']' => return None,
                _ => {}
            }
            self.pos += 1;
        }
        (depth == 0).then(|| &self.s[start..self.pos])
    }
}

/// Coerce a stored value into the declared field type.
///
/// Byte arrays go through `caster`; typed values are converted value to
/// value. Any mismatch yields null, never an error.
pub fn coerce(value: Value, target: &Field, caster: &dyn LoadCaster) -> Value {
    match (value, target.data_type) {
        (Value::Null, _) => Value::Null,
        (v, DataType::ByteArray) => v,
        (Value::Bytes(b), _) => caster.cast_bytes(&b, target),
        (Value::Tuple(t), DataType::Tuple) => match &target.schema {
            None => Value::Tuple(t),
            Some(s) if s.len() == t.len() => Value::Tuple(coerce_fields(t, s, caster)),
            Some(s) => {
                tracing::debug!(expected = s.len(), found = t.len(), "tuple arity mismatch yields null");
                Value::Null
            }
        },
        (Value::Bag(b), DataType::Bag) => match &target.schema {
            None => Value::Bag(b),
            Some(s) => match b.to_vec() {
                Ok(rows) => Value::Bag(Bag::from_tuples(
                    rows.into_iter()
                        .map(|t| {
                            if t.len() == s.len() {
                                coerce_fields(t, s, caster)
                            } else {
                                Tuple::nulls(s.len())
                            }
                        })
                        .collect(),
                )),
                Err(e) => {
                    tracing::debug!(error = %e, "unreadable bag coerced to null");
                    Value::Null
                }
            },
        },
        (Value::Map(m), DataType::Map) => Value::Map(m),
        (v, dt) if !dt.is_complex() => convert_scalar(v, dt),
        (v, dt) => {
            tracing::debug!(from = ?v.data_type(), to = %dt, "incompatible coercion yields null");
            Value::Null
        }
    }
}

fn coerce_fields(t: Tuple, schema: &Schema, caster: &dyn LoadCaster) -> Tuple {
    Tuple::new(
        t.into_values()
            .into_iter()
            .zip(schema.iter())
            .map(|(v, f)| coerce(v, f, caster))
            .collect(),
    )
}

/// Coerce a whole record: pad with nulls or truncate to the schema's arity.
pub fn coerce_tuple(row: Tuple, schema: &Schema, caster: &dyn LoadCaster) -> Tuple {
    let mut values = row.into_values();
    values.resize(schema.len(), Value::Null);
    Tuple::new(
        values
            .into_iter()
            .zip(schema.iter())
            .map(|(v, f)| coerce(v, f, caster))
            .collect(),
    )
}

/// Typed scalar-to-scalar conversion (numeric widening/narrowing, text parsing).
pub fn convert_scalar(v: Value, dt: DataType) -> Value {
    fn narrow_i32(x: f64) -> Value {
        if x.is_finite() && x >= i32::MIN as f64 && x <= i32::MAX as f64 {
            Value::Int(x as i32)
        } else {
            Value::Null
        }
    }
    fn narrow_i64(x: f64) -> Value {
        if x.is_finite() && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
            Value::Long(x as i64)
        } else {
            Value::Null
        }
    }

    match (v, dt) {
        (Value::Null, _) => Value::Null,
        (Value::Chars(s), dt) => parse_text(&s, dt),
        (Value::Bytes(b), dt) => parse_atom(&b, dt),
        (Value::Int(i), DataType::Int32) => Value::Int(i),
        (Value::Int(i), DataType::Int64) => Value::Long(i as i64),
        (Value::Int(i), DataType::Float32) => Value::Float(i as f32),
        (Value::Int(i), DataType::Float64) => Value::Double(i as f64),
        (Value::Long(i), DataType::Int32) => i32::try_from(i).map(Value::Int).unwrap_or(Value::Null),
        (Value::Long(i), DataType::Int64) => Value::Long(i),
        (Value::Long(i), DataType::Float32) => Value::Float(i as f32),
        (Value::Long(i), DataType::Float64) => Value::Double(i as f64),
        (Value::Float(x), DataType::Int32) => narrow_i32(x as f64),
        (Value::Float(x), DataType::Int64) => narrow_i64(x as f64),
        (Value::Float(x), DataType::Float32) => Value::Float(x),
        (Value::Float(x), DataType::Float64) => Value::Double(x as f64),
        (Value::Double(x), DataType::Int32) => narrow_i32(x),
        (Value::Double(x), DataType::Int64) => narrow_i64(x),
        (Value::Double(x), DataType::Float32) => Value::Float(x as f32),
        (Value::Double(x), DataType::Float64) => Value::Double(x),
        (Value::Boolean(b), DataType::Boolean) => Value::Boolean(b),
        (v, DataType::CharArray) if !matches!(v, Value::Tuple(_) | Value::Bag(_) | Value::Map(_)) => {
            Value::Chars(v.to_string())
        }
        (v, DataType::ByteArray) => v,
        (v, dt) => {
            tracing::debug!(from = ?v.data_type(), to = %dt, "unsupported conversion yields null");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(s: &str) -> Field {
        s.parse().unwrap()
    }

    fn bin(bytes: &str, ty: &str) -> Value {
        BinaryCaster.cast_bytes(bytes.as_bytes(), &field(ty))
    }

    fn text(bytes: &str, ty: &str) -> Value {
        Utf8Caster.cast_bytes(bytes.as_bytes(), &field(ty))
    }

    #[test]
    fn binary_cast_reinterprets_leading_bytes() {
        assert_eq!(bin("asdf", "int"), Value::Int(1634952294));
        assert_eq!(bin("asdff", "int"), Value::Int(1634952294));
        assert_eq!(bin("1231", "int"), Value::Int(825373489));
        assert_eq!(bin("1232123", "int"), Value::Int(825373490));
        assert_eq!(bin("123.4", "float"), Value::Float(2.5931501E-9));
        assert_eq!(bin("12345678", "long"), Value::Long(3544952156018063160));
        assert_eq!(bin("1234.567", "double"), Value::Double(1.030084341992388E-71));
    }

    #[test]
    fn binary_cast_short_payload_is_null() {
        assert_eq!(bin("sa", "int"), Value::Null);
        assert_eq!(bin("asdf", "long"), Value::Null);
        assert_eq!(bin("1.1", "float"), Value::Null);
        assert_eq!(bin("234", "double"), Value::Null);
    }

    #[test]
    fn text_cast_into_bag() {
        let ty = "bag{tuple(int)}";
        match text("{(asdf)}", ty) {
            Value::Bag(b) => assert_eq!(b.to_vec().unwrap()[0].get(0), &Value::Null),
            other => panic!("expected bag, got {other:?}"),
        }
        assert!(matches!(text("{(2344)}", ty), Value::Bag(_)));
        assert_eq!(text("{(2344}", ty), Value::Null);
        match text("{(323423423423434)}", ty) {
            Value::Bag(b) => assert!(b.to_vec().unwrap()[0].get(0).is_null()),
            other => panic!("expected bag, got {other:?}"),
        }
        assert!(matches!(text("{(323423423423434L)}", ty), Value::Bag(_)));
    }

    #[test]
    fn text_cast_into_nested_tuple() {
        let ty = "t:tuple(t:tuple(i:int))";
        for input in ["(123)", "((123)", "(123123123123)", "(asdf)"] {
            assert_eq!(text(input, ty), Value::Null, "input {input}");
        }
        let ok = text("((123))", ty);
        assert_eq!(ok.to_string(), "((123))");
    }

    #[test]
    fn text_cast_untyped_tuple_and_map() {
        assert_eq!(text("(hello)", "tuple()").to_string(), "(hello)");
        assert_eq!(text("[key#value]", "map[]").to_string(), "[key#value]");
        assert_eq!(text("12", "long"), Value::Long(12));
        assert_eq!(text("x", "int"), Value::Null);
    }

    #[test]
    fn records_survive_the_codec() {
        let mut m = BTreeMap::new();
        m.insert("k".to_string(), Value::Int(1));
        let rows = vec![
            Tuple::new(vec![
                Value::Bytes(b"asdf".to_vec()),
                Value::Chars("x".into()),
                Value::Null,
                Value::Map(m),
            ]),
            Tuple::new(vec![Value::Bag(Bag::from_tuples(vec![Tuple::new(vec![
                Value::Double(1.5),
            ])]))]),
        ];
        let bytes = encode_records(&rows).unwrap();
        assert_eq!(decode_records(&bytes).unwrap(), rows);
        assert!(decode_records(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn invalid_utf8_chararray_decodes_as_null() {
        let row = Tuple::new(vec![Value::Bytes(vec![0xff, 0xfe]), Value::Int(3)]);
        let mut bytes = encode_records([&row]).unwrap();
        // tuple tag + arity, then the first field's tag
        assert_eq!(bytes[5], tag::BYTEARRAY);
        bytes[5] = tag::CHARARRAY;
        assert_eq!(
            decode_records(&bytes).unwrap(),
            vec![Tuple::new(vec![Value::Null, Value::Int(3)])]
        );
        assert_eq!(bin("\u{ff}", "chararray"), Value::Chars("\u{ff}".into()));
        assert_eq!(
            BinaryCaster.cast_bytes(&[0xff, 0xfe], &field("chararray")),
            Value::Null
        );
    }

    #[test]
    fn coerce_pads_and_casts() {
        let schema: Schema = "a:int, b:chararray, c".parse().unwrap();
        let row = Tuple::new(vec![Value::Bytes(b"7".to_vec())]);
        let out = coerce_tuple(row, &schema, &Utf8Caster);
        assert_eq!(out, Tuple::new(vec![Value::Int(7), Value::Null, Value::Null]));

        let long_to_int = coerce(Value::Long(5), &field("int"), &BinaryCaster);
        assert_eq!(long_to_int, Value::Int(5));
        let too_big = coerce(Value::Long(i64::MAX), &field("int"), &BinaryCaster);
        assert_eq!(too_big, Value::Null);
    }
}
