//! Delimited text records. Each field loads as a bytearray; an empty field
//! loads as null. A blank line is a record with one null field.

use dagrel_core::value::{Tuple, Value};

use crate::error::{Error, Result};

/// Field delimiters are single bytes; control characters are allowed.
pub fn delimiter_byte(delimiter: char) -> Result<u8> {
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| Error::Config(format!("delimiter {delimiter:?} is not a single ASCII byte")))
}

pub fn decode(bytes: &[u8], delimiter: char, out: &mut Vec<Tuple>) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte(delimiter)?)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_reader(bytes);

    // The csv reader yields nothing for an empty line; every other line is
    // exactly one record.
    let mut records = reader.byte_records();
    for line in bytes.split_inclusive(|&b| b == b'\n') {
        if line == b"\n" {
            out.push(Tuple::new(vec![Value::Null]));
            continue;
        }
        let Some(record) = records.next() else {
            break;
        };
        let record = record?;
        let last = record.len().saturating_sub(1);
        out.push(Tuple::new(
            record
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    let f = if i == last { f.strip_suffix(b"\r").unwrap_or(f) } else { f };
                    if f.is_empty() {
                        Value::Null
                    } else {
                        Value::Bytes(f.to_vec())
                    }
                })
                .collect(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    #[test]
    fn control_char_delimiter() {
        let mut rows = Vec::new();
        decode(b"hello\x01world\ngood\x01morning\n", '\u{1}', &mut rows).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], Tuple::new(vec![bytes("hello"), bytes("world")]));
    }

    #[test]
    fn ragged_rows_and_empty_fields() {
        let mut rows = Vec::new();
        decode(b"1\t\t3\n4\n", '\t', &mut rows).unwrap();
        assert_eq!(rows[0], Tuple::new(vec![bytes("1"), Value::Null, bytes("3")]));
        assert_eq!(rows[1], Tuple::new(vec![bytes("4")]));
    }

    #[test]
    fn blank_lines_are_null_records() {
        let mut rows = Vec::new();
        decode(b"5\n\n3\n9\n\n1\n", '\t', &mut rows).unwrap();
        let null = Tuple::new(vec![Value::Null]);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[1], null);
        assert_eq!(rows[4], null);
        assert_eq!(rows[5], Tuple::new(vec![bytes("1")]));

        rows.clear();
        decode(b"a\n\n", '\t', &mut rows).unwrap();
        assert_eq!(rows, vec![Tuple::new(vec![bytes("a")]), null]);

        rows.clear();
        decode(b"", '\t', &mut rows).unwrap();
        decode(b"x", '\t', &mut rows).unwrap();
        assert_eq!(rows, vec![Tuple::new(vec![bytes("x")])]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut rows = Vec::new();
        decode(b"1\tb\r\n\r\n2\r\n", '\t', &mut rows).unwrap();
        assert_eq!(
            rows,
            vec![
                Tuple::new(vec![bytes("1"), bytes("b")]),
                Tuple::new(vec![Value::Null]),
                Tuple::new(vec![bytes("2")]),
            ]
        );
    }

    #[test]
    fn quotes_are_data() {
        let mut rows = Vec::new();
        decode(b"\"a\"\tb\n", '\t', &mut rows).unwrap();
        assert_eq!(rows[0].get(0), &bytes("\"a\""));
    }

    #[test]
    fn multibyte_delimiter_rejected() {
        assert!(delimiter_byte('é').is_err());
    }
}
