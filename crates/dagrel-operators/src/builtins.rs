//! Builtin functions, dispatched on their canonical names.
//!
//! Aggregates read the first column of each tuple of a bag argument. An
//! empty bag is a valid input: `COUNT` over it is 0, `SUM`/`AVG`/`MIN`/`MAX`
//! are null. A null argument yields null.

use dagrel_core::bag::Bag;
use dagrel_core::codec::parse_atom;
use dagrel_core::schema::DataType;
use dagrel_core::value::{Tuple, Value};

use crate::eval::compare_values;
use crate::traits::{OpError, Result};

/// Characters `TOKENIZE` splits on, besides whitespace.
const TOKEN_DELIMITERS: &[char] = &['"', ',', '(', ')', '*'];

pub fn call(name: &str, args: Vec<Value>) -> Result<Value> {
    match name {
        "COUNT" => with_bag(name, &args, |b| count(b, false)),
        "COUNT_STAR" => with_bag(name, &args, |b| count(b, true)),
        "SUM" => with_bag(name, &args, sum),
        "AVG" => with_bag(name, &args, avg),
        "MIN" => with_bag(name, &args, |b| extreme(b, false)),
        "MAX" => with_bag(name, &args, |b| extreme(b, true)),
        "IsEmpty" => Ok(match single(name, &args)? {
            Value::Bag(b) => Value::Boolean(b.is_empty()),
            Value::Map(m) => Value::Boolean(m.is_empty()),
            _ => Value::Null,
        }),
        "SIZE" => Ok(size(single(name, &args)?)),
        "CONCAT" => Ok(concat(&args)),
        "UPPER" => Ok(text(single(name, &args)?, str::to_uppercase)),
        "LOWER" => Ok(text(single(name, &args)?, str::to_lowercase)),
        "TOKENIZE" => Ok(tokenize(single(name, &args)?)),
        "TOTUPLE" => Ok(Value::Tuple(Tuple::new(args))),
        "TOBAG" => Ok(Value::Bag(Bag::from_tuples(
            args.into_iter()
                .map(|v| match v {
                    Value::Tuple(t) => t,
                    other => Tuple::new(vec![other]),
                })
                .collect(),
        ))),
        other => Err(OpError::Eval(format!("unknown function '{other}'"))),
    }
}

fn single<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value> {
    match args {
        [v] => Ok(v),
        _ => Err(OpError::Eval(format!(
            "{name} expects 1 argument, got {}",
            args.len()
        ))),
    }
}

fn with_bag(name: &str, args: &[Value], f: impl Fn(&Bag) -> Result<Value>) -> Result<Value> {
    match single(name, args)? {
        Value::Bag(b) => f(b),
        Value::Null => Ok(Value::Null),
        other => Err(OpError::Eval(format!("{name} expects a bag, got {other:?}"))),
    }
}

/// First column of every tuple in the bag.
fn firsts(b: &Bag) -> Result<Vec<Value>> {
    b.iter()
        .map(|t| Ok(t?.get(0).clone()))
        .collect::<Result<Vec<_>>>()
}

fn numeric(v: Value) -> Value {
    match v {
        Value::Bytes(b) => parse_atom(&b, DataType::Float64),
        Value::Chars(s) => parse_atom(s.as_bytes(), DataType::Float64),
        other => other,
    }
}

fn count(b: &Bag, star: bool) -> Result<Value> {
    if star {
        return Ok(Value::Long(b.len() as i64));
    }
    let n = firsts(b)?.iter().filter(|v| !v.is_null()).count();
    Ok(Value::Long(n as i64))
}

fn sum(b: &Bag) -> Result<Value> {
    let values: Vec<Value> = firsts(b)?
        .into_iter()
        .map(numeric)
        .filter(|v| !v.is_null())
        .collect();
    if values.is_empty() {
        return Ok(Value::Null);
    }
    if values.iter().all(|v| v.as_i64().is_some()) {
        let total = values
            .iter()
            .filter_map(Value::as_i64)
            .fold(0i64, i64::wrapping_add);
        return Ok(Value::Long(total));
    }
    Ok(Value::Double(values.iter().filter_map(Value::as_f64).sum()))
}

fn avg(b: &Bag) -> Result<Value> {
    let values: Vec<f64> = firsts(b)?
        .into_iter()
        .map(numeric)
        .filter_map(|v| v.as_f64())
        .collect();
    if values.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Double(values.iter().sum::<f64>() / values.len() as f64))
}

fn extreme(b: &Bag, max: bool) -> Result<Value> {
    let best = firsts(b)?
        .into_iter()
        .map(|v| match v {
            Value::Bytes(_) => numeric(v),
            other => other,
        })
        .filter(|v| !v.is_null())
        .reduce(|a, c| {
            let ord = compare_values(&c, &a);
            let better = if max { ord.is_gt() } else { ord.is_lt() };
            if better {
                c
            } else {
                a
            }
        });
    Ok(best.unwrap_or(Value::Null))
}

fn size(v: &Value) -> Value {
    let n = match v {
        Value::Null => return Value::Null,
        Value::Chars(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::Tuple(t) => t.len(),
        Value::Bag(b) => b.len(),
        Value::Map(m) => m.len(),
        _ => 1,
    };
    Value::Long(n as i64)
}

fn concat(args: &[Value]) -> Value {
    if args.iter().any(Value::is_null) {
        return Value::Null;
    }
    if args.iter().all(|a| matches!(a, Value::Bytes(_))) {
        let mut out = Vec::new();
        for a in args {
            if let Value::Bytes(b) = a {
                out.extend_from_slice(b);
            }
        }
        return Value::Bytes(out);
    }
    Value::Chars(args.iter().map(|a| a.to_string()).collect())
}

fn text(v: &Value, f: impl Fn(&str) -> String) -> Value {
    match v.as_str() {
        Some(s) => Value::Chars(f(s)),
        None => Value::Null,
    }
}

fn tokenize(v: &Value) -> Value {
    let Some(s) = v.as_str() else {
        return Value::Null;
    };
    let tokens = s
        .split(|c: char| c.is_whitespace() || TOKEN_DELIMITERS.contains(&c))
        .filter(|t| !t.is_empty())
        .map(|t| Tuple::new(vec![Value::Chars(t.to_string())]))
        .collect();
    Value::Bag(Bag::from_tuples(tokens))
}
