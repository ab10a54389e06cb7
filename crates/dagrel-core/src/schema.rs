//! Nested logical schema model.
//!
//! A [`Schema`] is an ordered list of [`Field`]s; position defines `$N`
//! access and names are optional. Tuple fields carry their nested schema,
//! bag fields carry the schema of their element tuples, maps are untyped.
//! A relation whose schema is not known at all is modelled one level up as
//! `Option<Schema>`; a known-arity schema whose fields are all `bytearray`
//! is the "all-unknown" case and unifies with anything of equal arity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    ByteArray,
    Int32,
    Int64,
    Float32,
    Float64,
    CharArray,
    Boolean,
    Tuple,
    Bag,
    Map,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::ByteArray => "bytearray",
            DataType::Int32 => "int",
            DataType::Int64 => "long",
            DataType::Float32 => "float",
            DataType::Float64 => "double",
            DataType::CharArray => "chararray",
            DataType::Boolean => "boolean",
            DataType::Tuple => "tuple",
            DataType::Bag => "bag",
            DataType::Map => "map",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        let t = match s.to_ascii_lowercase().as_str() {
            "bytearray" => DataType::ByteArray,
            "int" => DataType::Int32,
            "long" => DataType::Int64,
            "float" => DataType::Float32,
            "double" => DataType::Float64,
            "chararray" => DataType::CharArray,
            "boolean" => DataType::Boolean,
            "tuple" => DataType::Tuple,
            "bag" => DataType::Bag,
            "map" => DataType::Map,
            _ => return None,
        };
        Some(t)
    }

    /// Width of the native binary representation for fixed-width types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::Int32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::Float64 => Some(8),
            DataType::Boolean => Some(1),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Tuple | DataType::Bag | DataType::Map)
    }

    /// Whether values of this type can serve as sort keys.
    pub fn is_orderable(self) -> bool {
        !matches!(self, DataType::Map | DataType::Bag)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: Option<String>,
    pub data_type: DataType,
    /// Tuple: the tuple's fields. Bag: the element tuple's fields.
    pub schema: Option<Schema>,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: Some(name.into()),
            data_type,
            schema: None,
        }
    }

    pub fn unnamed(data_type: DataType) -> Self {
        Self {
            name: None,
            data_type,
            schema: None,
        }
    }

    pub fn tuple(name: Option<String>, schema: Option<Schema>) -> Self {
        Self {
            name,
            data_type: DataType::Tuple,
            schema,
        }
    }

    pub fn bag(name: Option<String>, element: Option<Schema>) -> Self {
        Self {
            name,
            data_type: DataType::Bag,
            schema: element,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.data_type == DataType::ByteArray
    }

    /// Render only the type part (`int`, `tuple(a:int)`, `bag{(x:long)}`).
    pub fn type_string(&self) -> String {
        match self.data_type {
            DataType::Tuple => match &self.schema {
                Some(s) => format!("tuple({s})"),
                None => "tuple()".to_string(),
            },
            DataType::Bag => match &self.schema {
                Some(s) => format!("bag{{({s})}}"),
                None => "bag{}".to_string(),
            },
            DataType::Map => "map[]".to_string(),
            other => other.name().to_string(),
        }
    }

    fn merge(&self, other: &Field, position: usize) -> Result<Field> {
        let name = match (&self.name, &other.name) {
            (Some(a), Some(b)) if a == b => Some(a.clone()),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            // conflicting names: drop, so merge stays commutative
            _ => None,
        };
        let mismatch = || Error::SchemaMerge {
            position,
            left: self.to_string(),
            right: other.to_string(),
        };

        let (data_type, schema) = match (self.data_type, other.data_type) {
            (DataType::ByteArray, _) => (other.data_type, other.schema.clone()),
            (_, DataType::ByteArray) => (self.data_type, self.schema.clone()),
            (a, b) if a == b => match a {
                DataType::Tuple | DataType::Bag => {
                    let nested = match (&self.schema, &other.schema) {
                        (None, s) | (s, None) => s.clone(),
                        (Some(l), Some(r)) => {
                            if l.len() != r.len() {
                                return Err(mismatch());
                            }
                            Some(l.merge(r).map_err(|_| mismatch())?)
                        }
                    };
                    (a, nested)
                }
                _ => (a, None),
            },
            _ => return Err(mismatch()),
        };

        Ok(Field {
            name,
            data_type,
            schema,
        })
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "{}:{}", n, self.type_string()),
            None => f.write_str(&self.type_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// All-bytearray, unnamed schema of the given arity.
    pub fn unknown(arity: usize) -> Self {
        Self {
            fields: vec![Field::unnamed(DataType::ByteArray); arity],
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }

    /// Exact-name lookup, first match.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }

    pub fn is_all_unknown(&self) -> bool {
        self.fields.iter().all(Field::is_unknown)
    }

    /// Position-wise merge of two schemas of equal arity.
    ///
    /// `bytearray` adopts the other side's type; identical types merge
    /// (recursively for tuple/bag); anything else fails with
    /// [`Error::SchemaMerge`] at the first offending position, rendered with
    /// `self` as the left operand.
    pub fn merge(&self, other: &Schema) -> Result<Schema> {
        if self.len() != other.len() {
            return Err(Error::SchemaMerge {
                position: self.len().min(other.len()),
                left: format!("{{{self}}} (arity {})", self.len()),
                right: format!("{{{other}}} (arity {})", other.len()),
            });
        }
        let fields = self
            .fields
            .iter()
            .zip(other.fields.iter())
            .enumerate()
            .map(|(pos, (a, b))| a.merge(b, pos))
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema { fields })
    }

    /// Prefix every named field with `alias::`.
    pub fn qualify(&self, alias: &str) -> Schema {
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let mut f = f.clone();
                f.name = f.name.map(|n| format!("{alias}::{n}"));
                f
            })
            .collect();
        Schema { fields }
    }

    /// Resolve a (possibly qualified) name to a position.
    ///
    /// An exact match wins; otherwise the name is matched against the trailing
    /// `::` segments of qualified field names. Two or more matches are an
    /// [`Error::AmbiguousReference`].
    pub fn resolve(&self, name: &str) -> Result<usize> {
        let hits = self.matches(name);
        match hits.len() {
            1 => Ok(hits[0]),
            0 => Err(Error::FieldNotFound {
                name: name.to_string(),
                schema: format!("{{{self}}}"),
            }),
            _ => Err(self.ambiguous(name, &hits)),
        }
    }

    /// Positions `name` refers to: exact matches if any, else matches on
    /// the trailing `::` segments of qualified names.
    pub fn matches(&self, name: &str) -> Vec<usize> {
        let exact: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name.as_deref() == Some(name))
            .map(|(i, _)| i)
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        self.suffix_matches(&format!("::{name}"))
    }

    /// Every position whose name equals `name` or ends with `::name`.
    pub fn candidates(&self, name: &str) -> Vec<usize> {
        let suffix = format!("::{name}");
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| match f.name.as_deref() {
                Some(n) => n == name || n.ends_with(&suffix),
                None => false,
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn suffix_matches(&self, suffix: &str) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name.as_deref().is_some_and(|n| n.ends_with(suffix)))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn ambiguous(&self, name: &str, positions: &[usize]) -> Error {
        Error::AmbiguousReference {
            name: name.to_string(),
            candidates: positions
                .iter()
                .filter_map(|&i| self.fields[i].name.clone())
                .collect(),
        }
    }

    /// Concatenate schemas (join/cross output).
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Schema>) -> Schema {
        Schema {
            fields: parts
                .into_iter()
                .flat_map(|s| s.fields.iter().cloned())
                .collect(),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

impl FromStr for Schema {
    type Err = Error;

    /// Parse a schema string such as `a0:int, a1:bag{t:tuple(x:int)}, a2, m:map[]`.
    fn from_str(s: &str) -> Result<Self> {
        let mut p = Parser::new(s);
        let fields = p.fields(None)?;
        p.skip_ws();
        if !p.at_end() {
            return Err(p.error("trailing input"));
        }
        Ok(Schema { fields })
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut schema: Schema = s.parse()?;
        match schema.fields.len() {
            1 => Ok(schema.fields.remove(0)),
            n => Err(Error::Plan(format!("expected one field in '{s}', found {n}"))),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, msg: &str) -> Error {
        Error::Plan(format!("bad schema '{}' at {}: {}", self.src, self.pos, msg))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn fields(&mut self, close: Option<char>) -> Result<Vec<Field>> {
        let mut out = Vec::new();
        self.skip_ws();
        if self.at_end() || (close.is_some() && self.peek() == close) {
            return Ok(out);
        }
        loop {
            out.push(self.field()?);
            self.skip_ws();
            if self.peek() == Some(',') {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(out)
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        loop {
            while self
                .peek()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
            {
                self.pos += 1;
            }
            // qualified names: a::b
            if self.peek() == Some(':') && self.chars.get(self.pos + 1) == Some(&':') {
                self.pos += 2;
                continue;
            }
            break;
        }
        (self.pos > start).then(|| self.chars[start..self.pos].iter().collect())
    }

    fn field(&mut self) -> Result<Field> {
        self.skip_ws();
        if matches!(self.peek(), Some('(') | Some('{') | Some('[')) {
            return self.typed(None, None);
        }
        let word = self.ident().ok_or_else(|| self.error("expected field"))?;
        self.skip_ws();
        if self.peek() == Some(':') {
            self.pos += 1;
            self.skip_ws();
            if matches!(self.peek(), Some('(') | Some('{') | Some('[')) {
                return self.typed(Some(word), None);
            }
            let ty = self.ident().ok_or_else(|| self.error("expected type"))?;
            return self.typed(Some(word), Some(ty));
        }
        if DataType::from_name(&word).is_some() {
            return self.typed(None, Some(word));
        }
        Ok(Field::new(word, DataType::ByteArray))
    }

    fn typed(&mut self, name: Option<String>, keyword: Option<String>) -> Result<Field> {
        self.skip_ws();
        let data_type = match keyword.as_deref() {
            Some(k) => DataType::from_name(k).ok_or_else(|| self.error(&format!("unknown type '{k}'")))?,
            None => match self.peek() {
                Some('(') => DataType::Tuple,
                Some('{') => DataType::Bag,
                Some('[') => DataType::Map,
                _ => return Err(self.error("expected type")),
            },
        };
        match data_type {
            DataType::Tuple => {
                self.expect('(')?;
                let inner = self.fields(Some(')'))?;
                self.expect(')')?;
                Ok(Field::tuple(name, (!inner.is_empty()).then(|| Schema::new(inner))))
            }
            DataType::Bag => {
                self.expect('{')?;
                let inner = self.fields(Some('}'))?;
                self.expect('}')?;
                let element = match inner.as_slice() {
                    [] => None,
                    [only] if only.data_type == DataType::Tuple => only.schema.clone(),
                    _ => Some(Schema::new(inner)),
                };
                Ok(Field::bag(name, element))
            }
            DataType::Map => {
                self.expect('[')?;
                // value type is informational only
                while self.peek().is_some_and(|c| c != ']') {
                    self.pos += 1;
                }
                self.expect(']')?;
                Ok(Field {
                    name,
                    data_type,
                    schema: None,
                })
            }
            other => Ok(Field {
                name,
                data_type: other,
                schema: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Schema {
        text.parse().unwrap()
    }

    #[test]
    fn parses_nested_types() {
        let schema = s("a0:int, a1:bag{t:tuple(x:int, y:chararray)}, a2, m:map[], t:tuple()");
        assert_eq!(schema.len(), 5);
        assert_eq!(schema.fields[0].data_type, DataType::Int32);
        let bag = &schema.fields[1];
        assert_eq!(bag.data_type, DataType::Bag);
        assert_eq!(bag.schema.as_ref().unwrap().len(), 2);
        assert_eq!(schema.fields[2].data_type, DataType::ByteArray);
        assert_eq!(schema.fields[3].data_type, DataType::Map);
        assert!(schema.fields[4].schema.is_none());
        assert_eq!(s(&schema.to_string()), schema);
    }

    #[test]
    fn parses_unnamed_and_shorthand() {
        let schema = s("bag{tuple(int)}, (long, chararray), {(x:int)}");
        assert_eq!(schema.fields[0].data_type, DataType::Bag);
        assert_eq!(
            schema.fields[0].schema.as_ref().unwrap().fields[0].data_type,
            DataType::Int32
        );
        assert_eq!(schema.fields[1].data_type, DataType::Tuple);
        assert_eq!(schema.fields[2].data_type, DataType::Bag);
    }

    #[test]
    fn merge_adopts_concrete_type() {
        let a = s("b0, b1:int, b2");
        let b = s("a0, a1:int, a2:int");
        let m = a.merge(&b).unwrap();
        assert_eq!(m.fields[2].data_type, DataType::Int32);
        // conflicting names are dropped
        assert_eq!(m.fields[0].name, None);
        assert_eq!(a.merge(&b).unwrap(), b.merge(&a).unwrap());
    }

    #[test]
    fn merge_with_all_unknown_yields_other() {
        let a = s("x:int, y:bag{(z:long)}, w:chararray");
        let u = Schema::unknown(3);
        assert_eq!(a.merge(&u).unwrap(), a);
        assert_eq!(u.merge(&a).unwrap(), a);
    }

    #[test]
    fn merge_incompatible_reports_position() {
        let a = s("x:int, y:int");
        let b = s("x:int, y:chararray");
        let err = a.merge(&b).unwrap_err();
        assert_eq!(err.code(), 1117);
        match err {
            Error::SchemaMerge { position, left, .. } => {
                assert_eq!(position, 1);
                assert_eq!(left, "y:int");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn merge_nested_requires_equal_arity() {
        let a = s("t:tuple(a:int, b:int)");
        let b = s("t:tuple(a:int)");
        assert!(a.merge(&b).is_err());
        let c = s("t:tuple(a, b:long)");
        let d = s("t:tuple(a:int, b)");
        let m = c.merge(&d).unwrap();
        assert_eq!(m.fields[0].schema, Some(s("a:int, b:long")));
    }

    #[test]
    fn qualify_and_resolve() {
        let joined = Schema::concat([&s("name, age").qualify("C"), &s("name, age").qualify("D")]);
        assert_eq!(joined.resolve("C::age").unwrap(), 1);
        assert_eq!(joined.resolve("D::name").unwrap(), 2);
        let err = joined.resolve("age").unwrap_err();
        assert_eq!(err.code(), 1025);
        assert_eq!(s("a, b").resolve("c").unwrap_err().code(), 1128);

        let nested = s("E::C::age, E::D::name");
        assert_eq!(nested.resolve("C::age").unwrap(), 0);
        assert_eq!(nested.resolve("name").unwrap(), 1);
    }
}
