//! Evaluation of bound expressions against one row.
//!
//! Expressions reaching this module are already bound: columns are
//! positions, nested aliases are local slots and every implicit cast names
//! its caster. Nulls propagate through arithmetic and comparisons; logical
//! operators use three-valued logic. Integer division by zero yields null.

use std::cmp::Ordering;

use dagrel_core::bag::Bag;
use dagrel_core::codec::{coerce, CasterKind};
use dagrel_core::expr::{BinaryOp, ColumnRef, Expr};
use dagrel_core::value::{Tuple, Value};

use crate::builtins;
use crate::traits::{EvalContext, OpError, Result};

/// Evaluate `expr` against `row`, with `locals` holding the nested aliases
/// computed so far.
pub fn eval(expr: &Expr, row: &Tuple, locals: &[Value], ctx: &EvalContext) -> Result<Value> {
    match expr {
        Expr::Col(ColumnRef::Position(p)) => Ok(row.get(*p).clone()),
        Expr::Col(ColumnRef::Name(n)) => Err(OpError::Eval(format!(
            "unbound column reference '{n}'"
        ))),
        Expr::Local(i) => locals
            .get(*i)
            .cloned()
            .ok_or_else(|| OpError::Eval(format!("nested slot %{i} is not defined yet"))),
        Expr::Lit(l) => Ok(l.to_value()),
        Expr::Binary { op, left, right } => {
            let l = eval(left, row, locals, ctx)?;
            match op {
                BinaryOp::And => {
                    if l.as_bool() == Some(false) {
                        return Ok(Value::Boolean(false));
                    }
                    let r = eval(right, row, locals, ctx)?;
                    Ok(and(&l, &r))
                }
                BinaryOp::Or => {
                    if l.as_bool() == Some(true) {
                        return Ok(Value::Boolean(true));
                    }
                    let r = eval(right, row, locals, ctx)?;
                    Ok(or(&l, &r))
                }
                op => {
                    let r = eval(right, row, locals, ctx)?;
                    binary(*op, &l, &r)
                }
            }
        }
        Expr::Not(inner) => Ok(match eval(inner, row, locals, ctx)? {
            Value::Boolean(b) => Value::Boolean(!b),
            _ => Value::Null,
        }),
        Expr::Neg(inner) => Ok(match eval(inner, row, locals, ctx)? {
            Value::Int(v) => Value::Int(v.wrapping_neg()),
            Value::Long(v) => Value::Long(v.wrapping_neg()),
            Value::Float(v) => Value::Float(-v),
            Value::Double(v) => Value::Double(-v),
            _ => Value::Null,
        }),
        Expr::IsNull { expr, negated } => {
            let v = eval(expr, row, locals, ctx)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
        Expr::Cast { expr, to, caster } => {
            let v = eval(expr, row, locals, ctx)?;
            let caster = caster.unwrap_or(CasterKind::Utf8).caster();
            Ok(coerce(v, &to.0, caster))
        }
        Expr::BinCond {
            cond,
            then,
            otherwise,
        } => match eval(cond, row, locals, ctx)? {
            Value::Boolean(true) => eval(then, row, locals, ctx),
            Value::Boolean(false) => eval(otherwise, row, locals, ctx),
            _ => Ok(Value::Null),
        },
        Expr::Func { name, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, row, locals, ctx))
                .collect::<Result<Vec<_>>>()?;
            builtins::call(name, values)
        }
        Expr::Project { expr, cols } => {
            let v = eval(expr, row, locals, ctx)?;
            let cols = positions(cols)?;
            project(v, &cols)
        }
        Expr::MapLookup { expr, key } => Ok(match eval(expr, row, locals, ctx)? {
            Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        Expr::Scalar { relation, column } => match column {
            ColumnRef::Position(p) => ctx.scalar(relation, *p),
            ColumnRef::Name(n) => Err(OpError::Eval(format!(
                "unbound scalar column '{relation}.{n}'"
            ))),
        },
        Expr::Star => Err(OpError::Eval("'*' cannot be evaluated on its own".into())),
    }
}

/// Evaluate a predicate; null and non-boolean results reject the row.
pub fn eval_predicate(expr: &Expr, row: &Tuple, locals: &[Value], ctx: &EvalContext) -> Result<bool> {
    Ok(eval(expr, row, locals, ctx)?.as_bool() == Some(true))
}

/// Evaluate a list of key expressions: one key is used as is, several form a tuple.
pub fn eval_key(keys: &[Expr], row: &Tuple, ctx: &EvalContext) -> Result<Value> {
    match keys {
        [single] => eval(single, row, &[], ctx),
        many => Ok(Value::Tuple(Tuple::new(
            many.iter()
                .map(|k| eval(k, row, &[], ctx))
                .collect::<Result<Vec<_>>>()?,
        ))),
    }
}

fn positions(cols: &[ColumnRef]) -> Result<Vec<usize>> {
    cols.iter()
        .map(|c| match c {
            ColumnRef::Position(p) => Ok(*p),
            ColumnRef::Name(n) => Err(OpError::Eval(format!("unbound dereference '{n}'"))),
        })
        .collect()
}

fn project_tuple(t: &Tuple, cols: &[usize]) -> Value {
    match cols {
        [single] => t.get(*single).clone(),
        many => Value::Tuple(t.project(many)),
    }
}

fn project(v: Value, cols: &[usize]) -> Result<Value> {
    Ok(match v {
        Value::Tuple(t) => project_tuple(&t, cols),
        Value::Bag(b) => {
            let rows = b
                .iter()
                .map(|t| t.map(|t| t.project(cols)))
                .collect::<dagrel_core::Result<Vec<_>>>()?;
            Value::Bag(Bag::from_tuples(rows))
        }
        _ => Value::Null,
    })
}

fn and(l: &Value, r: &Value) -> Value {
    match (l.as_bool(), r.as_bool()) {
        (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
        (Some(true), Some(true)) => Value::Boolean(true),
        _ => Value::Null,
    }
}

fn or(l: &Value, r: &Value) -> Value {
    match (l.as_bool(), r.as_bool()) {
        (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
        (Some(false), Some(false)) => Value::Boolean(false),
        _ => Value::Null,
    }
}

/// Order two non-null values, comparing numbers by value across widths and
/// text against byte arrays by content.
pub fn compare_values(l: &Value, r: &Value) -> Ordering {
    match (l, r) {
        (Value::Int(a), Value::Long(b)) => (*a as i64).cmp(b),
        (Value::Long(a), Value::Int(b)) => a.cmp(&(*b as i64)),
        (a, b) if a.type_rank() != b.type_rank() => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => a.cmp(b),
            },
        },
        (a, b) => a.cmp(b),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    if op.is_comparison() {
        let ord = compare_values(l, r);
        let b = match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::Ne => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Le => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        };
        return Ok(Value::Boolean(b));
    }
    arithmetic(op, l, r)
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let v = match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => Value::Int(a.wrapping_add(*b)),
            BinaryOp::Sub => Value::Int(a.wrapping_sub(*b)),
            BinaryOp::Mul => Value::Int(a.wrapping_mul(*b)),
            BinaryOp::Div => a.checked_div(*b).map_or(Value::Null, Value::Int),
            _ => a.checked_rem(*b).map_or(Value::Null, Value::Int),
        },
        (Value::Int(_) | Value::Long(_), Value::Int(_) | Value::Long(_)) => {
            let (a, b) = (l.as_i64().unwrap_or_default(), r.as_i64().unwrap_or_default());
            match op {
                BinaryOp::Add => Value::Long(a.wrapping_add(b)),
                BinaryOp::Sub => Value::Long(a.wrapping_sub(b)),
                BinaryOp::Mul => Value::Long(a.wrapping_mul(b)),
                BinaryOp::Div => a.checked_div(b).map_or(Value::Null, Value::Long),
                _ => a.checked_rem(b).map_or(Value::Null, Value::Long),
            }
        }
        (Value::Float(a), Value::Float(b)) => match float_op(op, *a as f64, *b as f64) {
            Some(x) => Value::Float(x as f32),
            None => Value::Null,
        },
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => float_op(op, a, b).map_or(Value::Null, Value::Double),
            _ => {
                return Err(OpError::Eval(format!(
                    "cannot apply '{}' to {l:?} and {r:?}",
                    op.symbol()
                )))
            }
        },
    };
    Ok(v)
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mul => Some(a * b),
        BinaryOp::Div if b == 0.0 => None,
        BinaryOp::Div => Some(a / b),
        _ if b == 0.0 => None,
        _ => Some(a % b),
    }
}
