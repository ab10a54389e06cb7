//! Builtin function catalog: canonical names and result types.
//!
//! Names match case-insensitively; bound expressions always carry the
//! canonical spelling so the evaluator can dispatch on it directly.

use dagrel_core::error::{Error, Result};
use dagrel_core::schema::{DataType, Field, Schema};

pub const BUILTINS: &[&str] = &[
    "COUNT",
    "COUNT_STAR",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "IsEmpty",
    "SIZE",
    "CONCAT",
    "UPPER",
    "LOWER",
    "TOKENIZE",
    "TOTUPLE",
    "TOBAG",
];

pub fn canonical(name: &str) -> Option<&'static str> {
    BUILTINS
        .iter()
        .copied()
        .find(|b| b.eq_ignore_ascii_case(name))
}

fn arity(name: &str, args: &[Field], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Error::TypeCheck(format!(
            "{name} expects {expected} argument(s), got {}",
            args.len()
        )))
    }
}

/// Element type aggregated by SUM/MIN/MAX/AVG: the bag's single column.
fn aggregated(name: &str, arg: &Field) -> Result<DataType> {
    match arg.data_type {
        DataType::Bag => Ok(arg
            .schema
            .as_ref()
            .and_then(|s| s.field(0))
            .map(|f| f.data_type)
            .unwrap_or(DataType::ByteArray)),
        DataType::ByteArray => Ok(DataType::ByteArray),
        other => Err(Error::TypeCheck(format!("{name} expects a bag, got {other}"))),
    }
}

/// Resolve `name` applied to `args`; returns the canonical name and result field.
pub fn resolve(name: &str, args: &[Field]) -> Result<(&'static str, Field)> {
    let canon = canonical(name).ok_or_else(|| Error::Plan(format!("unknown function '{name}'")))?;
    let dt = |t| Field::unnamed(t);
    let field = match canon {
        "COUNT" | "COUNT_STAR" => {
            arity(canon, args, 1)?;
            aggregated(canon, &args[0])?;
            dt(DataType::Int64)
        }
        "SIZE" => {
            arity(canon, args, 1)?;
            dt(DataType::Int64)
        }
        "IsEmpty" => {
            arity(canon, args, 1)?;
            match args[0].data_type {
                DataType::Bag | DataType::Map | DataType::ByteArray => dt(DataType::Boolean),
                other => {
                    return Err(Error::TypeCheck(format!("IsEmpty expects a bag or map, got {other}")))
                }
            }
        }
        "SUM" => {
            arity(canon, args, 1)?;
            match aggregated(canon, &args[0])? {
                DataType::Int32 | DataType::Int64 => dt(DataType::Int64),
                DataType::Float32 | DataType::Float64 | DataType::ByteArray => dt(DataType::Float64),
                other => return Err(Error::TypeCheck(format!("SUM over {other}"))),
            }
        }
        "AVG" => {
            arity(canon, args, 1)?;
            match aggregated(canon, &args[0])? {
                t if t.is_numeric() || t == DataType::ByteArray => dt(DataType::Float64),
                other => return Err(Error::TypeCheck(format!("AVG over {other}"))),
            }
        }
        "MIN" | "MAX" => {
            arity(canon, args, 1)?;
            match aggregated(canon, &args[0])? {
                DataType::ByteArray => dt(DataType::Float64),
                t if t.is_orderable() && !t.is_complex() => dt(t),
                other => return Err(Error::TypeCheck(format!("{canon} over {other}"))),
            }
        }
        "CONCAT" => {
            if args.len() < 2 {
                return Err(Error::TypeCheck("CONCAT expects at least 2 arguments".into()));
            }
            if args.iter().all(|a| a.data_type == DataType::ByteArray) {
                dt(DataType::ByteArray)
            } else {
                dt(DataType::CharArray)
            }
        }
        "UPPER" | "LOWER" => {
            arity(canon, args, 1)?;
            dt(DataType::CharArray)
        }
        "TOKENIZE" => {
            arity(canon, args, 1)?;
            Field::bag(
                None,
                Some(Schema::new(vec![Field::new("token", DataType::CharArray)])),
            )
        }
        "TOTUPLE" => Field::tuple(None, Some(Schema::new(args.to_vec()))),
        "TOBAG" => {
            let first = args.first().map(|f| f.data_type);
            let element = first.filter(|t| args.iter().all(|f| f.data_type == *t));
            let schema = element.map(|t| Schema::new(vec![Field::unnamed(t)]));
            Field::bag(None, schema)
        }
        other => {
            return Err(Error::Invariant(format!(
                "builtin '{other}' has no signature"
            )))
        }
    };
    Ok((canon, field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag_of(t: DataType) -> Field {
        Field::bag(None, Some(Schema::new(vec![Field::unnamed(t)])))
    }

    #[test]
    fn names_are_case_insensitive() {
        let (name, f) = resolve("count", &[bag_of(DataType::Int32)]).unwrap();
        assert_eq!(name, "COUNT");
        assert_eq!(f.data_type, DataType::Int64);
        assert_eq!(resolve("isempty", &[bag_of(DataType::Int32)]).unwrap().0, "IsEmpty");
    }

    #[test]
    fn aggregate_result_types() {
        assert_eq!(resolve("SUM", &[bag_of(DataType::Int32)]).unwrap().1.data_type, DataType::Int64);
        assert_eq!(resolve("SUM", &[bag_of(DataType::ByteArray)]).unwrap().1.data_type, DataType::Float64);
        assert_eq!(resolve("MAX", &[bag_of(DataType::CharArray)]).unwrap().1.data_type, DataType::CharArray);
        assert!(resolve("SUM", &[Field::unnamed(DataType::CharArray)]).is_err());
    }

    #[test]
    fn unknown_function_is_plan_error() {
        let err = resolve("NOPE", &[]).unwrap_err();
        assert_eq!(err.code(), 1200);
    }
}
