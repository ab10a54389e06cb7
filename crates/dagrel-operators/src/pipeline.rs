//! Map-side pipeline steps: filter, foreach with its inner plan, local limit.
//!
//! Steps are streaming: output order within a partition follows input order.

use dagrel_core::bag::Bag;
use dagrel_core::codec::coerce;
use dagrel_core::plan::{FieldCast, GenItem, InnerOp, InnerPlan, PipeOp};
use dagrel_core::value::{compare_rows, Tuple, Value};

use crate::eval::{eval, eval_predicate};
use crate::traits::{EvalContext, Result};

/// Apply `ops` in order to one partition.
pub fn run_pipeline(ops: &[PipeOp], rows: Vec<Tuple>, ctx: &EvalContext) -> Result<Vec<Tuple>> {
    ops.iter().try_fold(rows, |rows, op| {
        let before = rows.len();
        let out = apply(op, rows, ctx)?;
        tracing::trace!(step = op.name(), rows_in = before, rows_out = out.len(), "pipeline step");
        Ok(out)
    })
}

fn apply(op: &PipeOp, rows: Vec<Tuple>, ctx: &EvalContext) -> Result<Vec<Tuple>> {
    match op {
        PipeOp::Filter { predicate } => {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if eval_predicate(predicate, &row, &[], ctx)? {
                    out.push(row);
                }
            }
            Ok(out)
        }
        PipeOp::Foreach { plan } => {
            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                foreach_row(plan, row, ctx, &mut out)?;
            }
            Ok(out)
        }
        PipeOp::LocalLimit { count } => {
            let mut rows = rows;
            rows.truncate(usize::try_from(*count).unwrap_or(usize::MAX));
            Ok(rows)
        }
    }
}

/// Evaluate a foreach inner plan for one input row, appending its output rows.
///
/// Each generate item contributes one or more alternatives; the output is
/// their cross product. A flattened empty bag has no alternatives, so the
/// input row produces nothing.
pub fn foreach_row(plan: &InnerPlan, row: &Tuple, ctx: &EvalContext, out: &mut Vec<Tuple>) -> Result<()> {
    let mut locals = Vec::with_capacity(plan.stmts.len());
    for stmt in &plan.stmts {
        let v = nested(&stmt.op, row, &locals, ctx)?;
        locals.push(v);
    }

    let mut parts: Vec<Vec<Vec<Value>>> = Vec::with_capacity(plan.generate.len());
    for item in &plan.generate {
        let v = eval(&item.expr, row, &locals, ctx)?;
        let alternatives = expand(item, v)?;
        if alternatives.is_empty() {
            return Ok(());
        }
        parts.push(alternatives);
    }

    let mut acc: Vec<Vec<Value>> = vec![Vec::new()];
    for alternatives in &parts {
        let mut next = Vec::with_capacity(acc.len() * alternatives.len());
        for prefix in &acc {
            for alt in alternatives {
                let mut values = prefix.clone();
                values.extend(alt.iter().cloned());
                next.push(values);
            }
        }
        acc = next;
    }
    out.extend(acc.into_iter().map(Tuple::new));
    Ok(())
}

fn cast(values: Vec<Value>, casts: &[Option<FieldCast>]) -> Vec<Value> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| match casts.get(i) {
            Some(Some(c)) => coerce(v, &c.to, c.caster.caster()),
            _ => v,
        })
        .collect()
}

/// Alternatives contributed by one generate item.
fn expand(item: &GenItem, v: Value) -> Result<Vec<Vec<Value>>> {
    if !item.flatten {
        return Ok(vec![cast(vec![v], &item.casts)]);
    }
    let width = item.fields.len().max(1);
    let alternatives = match v {
        Value::Bag(b) => b
            .iter()
            .map(|t| Ok(cast(t?.into_values(), &item.casts)))
            .collect::<Result<Vec<_>>>()?,
        Value::Tuple(t) => vec![cast(t.into_values(), &item.casts)],
        Value::Null => vec![vec![Value::Null; width]],
        other => vec![cast(vec![other], &item.casts)],
    };
    Ok(alternatives)
}

/// Value bound to a nested alias.
fn nested(op: &InnerOp, row: &Tuple, locals: &[Value], ctx: &EvalContext) -> Result<Value> {
    let input = eval(op.source(), row, locals, ctx)?;
    if let InnerOp::Expr(_) = op {
        return Ok(input);
    }
    let bag = match input {
        Value::Bag(b) => b,
        Value::Null => return Ok(Value::Null),
        other => {
            return Err(crate::traits::OpError::Eval(format!(
                "nested relational statement over a non-bag value {other:?}"
            )))
        }
    };
    let mut rows = bag.to_vec()?;
    match op {
        InnerOp::Filter { predicate, .. } => {
            let mut kept = Vec::with_capacity(rows.len());
            for t in rows {
                if eval_predicate(predicate, &t, locals, ctx)? {
                    kept.push(t);
                }
            }
            rows = kept;
        }
        InnerOp::Order { keys, .. } => rows.sort_by(|a, b| compare_rows(a, b, keys)),
        InnerOp::Limit { count, .. } => {
            rows.truncate(usize::try_from(*count).unwrap_or(usize::MAX))
        }
        InnerOp::Expr(_) => {}
    }
    Ok(Value::Bag(Bag::from_tuples(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagrel_core::codec::CasterKind;
    use dagrel_core::expr::Expr;
    use dagrel_core::plan::InnerStmt;
    use dagrel_core::schema::{DataType, Field};
    use dagrel_core::value::SortKey;

    fn item(expr: Expr, flatten: bool) -> GenItem {
        GenItem {
            expr,
            flatten,
            fields: vec![Field::unnamed(DataType::ByteArray)],
            casts: Vec::new(),
        }
    }

    fn grouped(key: i32, members: &[i32]) -> Tuple {
        let bag = Bag::from_tuples(
            members
                .iter()
                .map(|m| Tuple::new(vec![Value::Int(*m)]))
                .collect(),
        );
        Tuple::new(vec![Value::Int(key), Value::Bag(bag)])
    }

    #[test]
    fn flatten_of_empty_bag_suppresses_the_row() {
        let plan = InnerPlan {
            stmts: Vec::new(),
            generate: vec![item(Expr::pos(0), false), item(Expr::pos(1), true)],
        };
        let rows = vec![grouped(1, &[10, 11]), grouped(2, &[])];
        let out = run_pipeline(&[PipeOp::Foreach { plan }], rows, &EvalContext::new()).unwrap();
        assert_eq!(
            out,
            vec![
                Tuple::new(vec![Value::Int(1), Value::Int(10)]),
                Tuple::new(vec![Value::Int(1), Value::Int(11)]),
            ]
        );
    }

    #[test]
    fn two_flattens_form_a_cross_product() {
        let plan = InnerPlan {
            stmts: Vec::new(),
            generate: vec![item(Expr::pos(1), true), item(Expr::pos(1), true)],
        };
        let out = run_pipeline(
            &[PipeOp::Foreach { plan }],
            vec![grouped(1, &[1, 2])],
            &EvalContext::new(),
        )
        .unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn nested_order_and_limit() {
        let plan = InnerPlan {
            stmts: vec![
                InnerStmt {
                    alias: "S".into(),
                    op: InnerOp::Order {
                        input: Expr::pos(1),
                        keys: vec![SortKey::desc(0)],
                    },
                    field: Field::bag(Some("S".into()), None),
                },
                InnerStmt {
                    alias: "L".into(),
                    op: InnerOp::Limit {
                        input: Expr::Local(0),
                        count: 2,
                    },
                    field: Field::bag(Some("L".into()), None),
                },
            ],
            generate: vec![item(Expr::pos(0), false), item(Expr::Local(1), true)],
        };
        let out = run_pipeline(
            &[PipeOp::Foreach { plan }],
            vec![grouped(7, &[3, 9, 5])],
            &EvalContext::new(),
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                Tuple::new(vec![Value::Int(7), Value::Int(9)]),
                Tuple::new(vec![Value::Int(7), Value::Int(5)]),
            ]
        );
    }

    #[test]
    fn as_clause_casts_generated_fields() {
        let mut g = item(Expr::pos(0), false);
        g.casts = vec![Some(FieldCast {
            to: Field::new("x", DataType::Int64),
            caster: CasterKind::Utf8,
        })];
        let plan = InnerPlan {
            stmts: Vec::new(),
            generate: vec![g],
        };
        let out = run_pipeline(
            &[PipeOp::Foreach { plan }],
            vec![Tuple::new(vec![Value::Bytes(b"42".to_vec())])],
            &EvalContext::new(),
        )
        .unwrap();
        assert_eq!(out, vec![Tuple::new(vec![Value::Long(42)])]);
    }

    #[test]
    fn filter_then_local_limit() {
        let ops = vec![
            PipeOp::Filter {
                predicate: Expr::lt(Expr::pos(0), Expr::int(5)),
            },
            PipeOp::LocalLimit { count: 2 },
        ];
        let rows = (0..10).map(|i| Tuple::new(vec![Value::Int(i)])).collect();
        let out = run_pipeline(&ops, rows, &EvalContext::new()).unwrap();
        assert_eq!(out, vec![Tuple::new(vec![Value::Int(0)]), Tuple::new(vec![Value::Int(1)])]);
    }
}
