//! Name binding and implicit casts.
//!
//! Binding turns a front-end [`Expr`] into one that only refers to input
//! positions, nested locals and scalar node names, and computes its result
//! [`Field`]. Wherever a `bytearray` operand meets a concrete type the
//! binder inserts a cast carrying the caster of the load the bytes came
//! from.

use dagrel_core::codec::CasterKind;
use dagrel_core::error::{Error, Result};
use dagrel_core::expr::{BinaryOp, ColumnRef, Expr, Literal, TypeSpec};
use dagrel_core::schema::{DataType, Field, Schema};

use crate::functions;
use crate::lineage::{self, ColumnLineage, NodeLineage, Origin};
use crate::logical::LogicalPlan;

/// A nested alias visible to later statements of an inner plan.
#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub name: String,
    pub field: Field,
}

#[derive(Debug, Clone)]
pub(crate) struct Bound {
    pub expr: Expr,
    pub field: Field,
}

pub(crate) struct Scope<'a> {
    pub plan: &'a LogicalPlan,
    pub schema: Option<&'a Schema>,
    pub lineage: &'a NodeLineage,
    pub locals: &'a [Local],
    pub local_lineage: &'a [ColumnLineage],
}

/// Resolve `name` against `schema`. Several hits that carry the same lineage
/// tag are one column reached twice and bind to the first.
pub(crate) fn resolve_name(schema: &Schema, lineage: &NodeLineage, name: &str) -> Result<usize> {
    let hits = schema.matches(name);
    match hits.as_slice() {
        [] => Err(Error::FieldNotFound {
            name: name.to_string(),
            schema: format!("{{{schema}}}"),
        }),
        [only] => Ok(*only),
        [first, ..] if lineage.same_tag(&hits) => Ok(*first),
        _ => Err(schema.ambiguous(name, &hits)),
    }
}

fn numeric_rank(t: DataType) -> u8 {
    match t {
        DataType::Int32 => 1,
        DataType::Int64 => 2,
        DataType::Float32 => 3,
        DataType::Float64 => 4,
        _ => 0,
    }
}

pub(crate) fn wider(a: DataType, b: DataType) -> DataType {
    if numeric_rank(a) >= numeric_rank(b) {
        a
    } else {
        b
    }
}

/// Common type of two operands that must agree (comparison, key alignment).
pub(crate) fn unify(a: DataType, b: DataType) -> Result<DataType> {
    match (a, b) {
        (a, b) if a == b => Ok(a),
        (DataType::ByteArray, t) | (t, DataType::ByteArray) => Ok(t),
        (a, b) if a.is_numeric() && b.is_numeric() => Ok(wider(a, b)),
        (a, b) => Err(Error::TypeCheck(format!("incompatible types {a} and {b}"))),
    }
}

fn is_null_literal(e: &Expr) -> bool {
    matches!(e, Expr::Lit(Literal::Null))
}

impl<'a> Scope<'a> {
    pub fn new(plan: &'a LogicalPlan, schema: Option<&'a Schema>, lineage: &'a NodeLineage) -> Self {
        Self {
            plan,
            schema,
            lineage,
            locals: &[],
            local_lineage: &[],
        }
    }

    pub fn with_locals(mut self, locals: &'a [Local], lineage: &'a [ColumnLineage]) -> Self {
        self.locals = locals;
        self.local_lineage = lineage;
        self
    }

    pub fn lineage_of(&self, e: &Expr) -> ColumnLineage {
        lineage::expr(e, self.lineage, self.local_lineage, &self.plan.tags)
    }

    pub fn origin(&self, e: &Expr) -> Option<Origin> {
        self.lineage_of(e).origin
    }

    /// Caster for bytes produced by `e`; computed values were never loaded
    /// and are parsed as text.
    pub fn caster_for(&self, e: &Expr) -> CasterKind {
        self.origin(e).map(|o| o.caster).unwrap_or(CasterKind::Utf8)
    }

    /// Cast `b` to `to`, keeping its name. No-op when the type already matches.
    pub fn coerce(&self, b: Bound, to: DataType) -> Bound {
        if b.field.data_type == to {
            return b;
        }
        self.coerce_field(b, &Field::unnamed(to))
    }

    pub fn coerce_field(&self, b: Bound, to: &Field) -> Bound {
        let caster = self.caster_for(&b.expr);
        let field = Field {
            name: b.field.name.clone(),
            data_type: to.data_type,
            schema: to.schema.clone(),
        };
        Bound {
            expr: Expr::Cast {
                expr: Box::new(b.expr),
                to: TypeSpec(to.clone().with_name(None)),
                caster: Some(caster),
            },
            field,
        }
    }

    pub fn boolean(&self, b: Bound) -> Result<Bound> {
        match b.field.data_type {
            DataType::Boolean => Ok(b),
            DataType::ByteArray => Ok(self.coerce(b, DataType::Boolean)),
            other => Err(Error::TypeCheck(format!(
                "expected boolean, found {other} in '{}'",
                b.expr
            ))),
        }
    }

    fn column(&self, c: &ColumnRef) -> Result<Bound> {
        match c.normalized() {
            ColumnRef::Position(p) => {
                let field = match self.schema {
                    Some(s) => s.field(p).cloned().ok_or_else(|| {
                        Error::Plan(format!(
                            "Out of bound access: ${p} on schema with {} field(s)",
                            s.len()
                        ))
                    })?,
                    None => Field::unnamed(DataType::ByteArray),
                };
                Ok(Bound {
                    expr: Expr::pos(p),
                    field,
                })
            }
            ColumnRef::Name(name) => {
                if let Some(i) = self.locals.iter().rposition(|l| l.name == name) {
                    return Ok(Bound {
                        expr: Expr::Local(i),
                        field: self.locals[i].field.clone(),
                    });
                }
                let schema = self.schema.ok_or_else(|| Error::FieldNotFound {
                    name: name.clone(),
                    schema: "unknown".to_string(),
                })?;
                let p = resolve_name(schema, self.lineage, &name)?;
                Ok(Bound {
                    expr: Expr::pos(p),
                    field: schema.fields[p].clone(),
                })
            }
        }
    }

    pub fn bind(&self, e: &Expr) -> Result<Bound> {
        match e {
            Expr::Col(c) => self.column(c),
            Expr::Local(i) => {
                let local = self
                    .locals
                    .get(*i)
                    .ok_or_else(|| Error::Plan(format!("undefined nested slot %{i}")))?;
                Ok(Bound {
                    expr: e.clone(),
                    field: local.field.clone(),
                })
            }
            Expr::Lit(l) => Ok(Bound {
                expr: e.clone(),
                field: Field::unnamed(l.data_type()),
            }),
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Not(inner) => {
                let b = self.boolean(self.bind(inner)?)?;
                Ok(Bound {
                    expr: Expr::Not(Box::new(b.expr)),
                    field: Field::unnamed(DataType::Boolean),
                })
            }
            Expr::Neg(inner) => {
                let b = self.bind(inner)?;
                let b = match b.field.data_type {
                    DataType::ByteArray => self.coerce(b, DataType::Float64),
                    t if t.is_numeric() => b,
                    t => return Err(Error::TypeCheck(format!("cannot negate {t}"))),
                };
                let field = Field::unnamed(b.field.data_type);
                Ok(Bound {
                    expr: Expr::Neg(Box::new(b.expr)),
                    field,
                })
            }
            Expr::IsNull { expr, negated } => {
                let b = self.bind(expr)?;
                Ok(Bound {
                    expr: Expr::is_null(b.expr, *negated),
                    field: Field::unnamed(DataType::Boolean),
                })
            }
            Expr::Cast { expr, to, caster } => {
                let b = self.bind(expr)?;
                let caster = caster.unwrap_or_else(|| self.caster_for(&b.expr));
                let field = Field {
                    name: to.0.name.clone().or(b.field.name.clone()),
                    data_type: to.0.data_type,
                    schema: to.0.schema.clone(),
                };
                Ok(Bound {
                    expr: Expr::Cast {
                        expr: Box::new(b.expr),
                        to: to.clone(),
                        caster: Some(caster),
                    },
                    field,
                })
            }
            Expr::BinCond {
                cond,
                then,
                otherwise,
            } => self.bincond(cond, then, otherwise),
            Expr::Func { name, args } => self.func(name, args),
            Expr::Project { expr, cols } => self.project(expr, cols),
            Expr::MapLookup { expr, key } => {
                let b = self.bind(expr)?;
                if !matches!(b.field.data_type, DataType::Map | DataType::ByteArray) {
                    return Err(Error::TypeCheck(format!(
                        "'#' lookup needs a map, found {}",
                        b.field.data_type
                    )));
                }
                Ok(Bound {
                    expr: Expr::MapLookup {
                        expr: Box::new(b.expr),
                        key: key.clone(),
                    },
                    field: Field::unnamed(DataType::ByteArray),
                })
            }
            Expr::Scalar { relation, column } => self.scalar(relation, column),
            Expr::Star => Err(Error::Plan("'*' is only valid as a function argument".into())),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Bound> {
        let l = self.bind(left)?;
        let r = self.bind(right)?;
        let (lt, rt) = (l.field.data_type, r.field.data_type);
        let mismatch = || {
            Error::TypeCheck(format!(
                "cannot apply '{}' to {lt} and {rt} in '{} {} {}'",
                op.symbol(),
                left,
                op.symbol(),
                right
            ))
        };
        let (l, r, result) = if op.is_arithmetic() {
            let target = match (lt, rt) {
                (DataType::ByteArray, DataType::ByteArray) => DataType::Float64,
                (DataType::ByteArray, t) | (t, DataType::ByteArray) if t.is_numeric() => t,
                (a, b) if a.is_numeric() && b.is_numeric() => wider(a, b),
                _ => return Err(mismatch()),
            };
            (self.coerce(l, target), self.coerce(r, target), target)
        } else if op.is_comparison() {
            let target = match (lt, rt) {
                (a, b) if a == b => a,
                (DataType::ByteArray, t) | (t, DataType::ByteArray) => t,
                (a, b) if a.is_numeric() && b.is_numeric() => wider(a, b),
                _ => return Err(mismatch()),
            };
            if matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
                && !target.is_orderable()
            {
                return Err(mismatch());
            }
            (self.coerce(l, target), self.coerce(r, target), DataType::Boolean)
        } else {
            (self.boolean(l)?, self.boolean(r)?, DataType::Boolean)
        };
        Ok(Bound {
            expr: Expr::binary(op, l.expr, r.expr),
            field: Field::unnamed(result),
        })
    }

    fn bincond(&self, cond: &Expr, then: &Expr, otherwise: &Expr) -> Result<Bound> {
        let c = self.boolean(self.bind(cond)?)?;
        let a = self.bind(then)?;
        let b = self.bind(otherwise)?;
        let (a, b, field) = if a.field.data_type == b.field.data_type {
            let field = a.field.clone().with_name(None);
            (a, b, field)
        } else if is_null_literal(&a.expr) {
            let field = b.field.clone().with_name(None);
            (a, b, field)
        } else if is_null_literal(&b.expr) {
            let field = a.field.clone().with_name(None);
            (a, b, field)
        } else {
            let target = unify(a.field.data_type, b.field.data_type)?;
            (
                self.coerce(a, target),
                self.coerce(b, target),
                Field::unnamed(target),
            )
        };
        Ok(Bound {
            expr: Expr::bincond(c.expr, a.expr, b.expr),
            field,
        })
    }

    fn func(&self, name: &str, args: &[Expr]) -> Result<Bound> {
        let mut bound = Vec::with_capacity(args.len());
        for a in args {
            if matches!(a, Expr::Star) {
                let schema = self.schema.ok_or_else(|| {
                    Error::TypeCheck(format!("'*' in {name}() needs a known input schema"))
                })?;
                for p in 0..schema.len() {
                    bound.push(self.column(&ColumnRef::Position(p))?);
                }
            } else {
                bound.push(self.bind(a)?);
            }
        }
        let fields: Vec<Field> = bound.iter().map(|b| b.field.clone()).collect();
        let (canon, field) = functions::resolve(name, &fields)?;
        Ok(Bound {
            expr: Expr::func(canon, bound.into_iter().map(|b| b.expr).collect()),
            field,
        })
    }

    fn project(&self, expr: &Expr, cols: &[ColumnRef]) -> Result<Bound> {
        let b = self.bind(expr)?;
        let inner = b.field.schema.as_ref();
        let mut positions = Vec::with_capacity(cols.len());
        let mut fields = Vec::with_capacity(cols.len());
        for c in cols {
            match (c.normalized(), inner) {
                (ColumnRef::Position(p), Some(s)) => {
                    let f = s.field(p).cloned().ok_or_else(|| {
                        Error::Plan(format!("Out of bound access: ${p} in '{}'", b.expr))
                    })?;
                    positions.push(ColumnRef::Position(p));
                    fields.push(f);
                }
                (ColumnRef::Position(p), None) => {
                    positions.push(ColumnRef::Position(p));
                    fields.push(Field::unnamed(DataType::ByteArray));
                }
                (ColumnRef::Name(n), Some(s)) => {
                    let elin = NodeLineage {
                        columns: self.lineage_of(&b.expr).nested,
                        rest: None,
                    };
                    let p = resolve_name(s, &elin, &n)?;
                    positions.push(ColumnRef::Position(p));
                    fields.push(s.fields[p].clone());
                }
                (ColumnRef::Name(n), None) => {
                    return Err(Error::FieldNotFound {
                        name: n,
                        schema: format!("unknown ({})", b.expr),
                    })
                }
            }
        }
        let field = match b.field.data_type {
            DataType::Tuple if fields.len() == 1 => fields.remove(0),
            DataType::Tuple => Field::tuple(None, Some(Schema::new(fields))),
            DataType::Bag => {
                let name = (fields.len() == 1).then(|| fields[0].name.clone()).flatten();
                Field::bag(name, Some(Schema::new(fields)))
            }
            DataType::ByteArray if fields.len() == 1 => Field::unnamed(DataType::ByteArray),
            DataType::ByteArray => Field::tuple(None, Some(Schema::new(fields))),
            other => {
                return Err(Error::TypeCheck(format!(
                    "cannot dereference {other} in '{}'",
                    b.expr
                )))
            }
        };
        Ok(Bound {
            expr: Expr::Project {
                expr: Box::new(b.expr),
                cols: positions,
            },
            field,
        })
    }

    fn scalar(&self, relation: &str, column: &ColumnRef) -> Result<Bound> {
        let id = self
            .plan
            .alias(relation)
            .ok_or_else(|| Error::Plan(format!("undefined scalar relation '{relation}'")))?;
        let node = self.plan.node(id);
        let schema = self.plan.schema(id);
        let (pos, field) = match (column.normalized(), schema) {
            (ColumnRef::Position(p), Some(s)) => {
                let f = s.field(p).cloned().ok_or_else(|| {
                    Error::Plan(format!("Out of bound access: {relation}.${p}"))
                })?;
                (p, f)
            }
            (ColumnRef::Position(p), None) => (p, Field::unnamed(DataType::ByteArray)),
            (ColumnRef::Name(n), Some(s)) => {
                let p = resolve_name(s, self.plan.lineage(id), &n)?;
                (p, s.fields[p].clone())
            }
            (ColumnRef::Name(n), None) => {
                return Err(Error::FieldNotFound {
                    name: format!("{relation}.{n}"),
                    schema: "unknown".into(),
                })
            }
        };
        Ok(Bound {
            expr: Expr::Scalar {
                relation: node.name.clone(),
                column: ColumnRef::Position(pos),
            },
            field,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::LogicalOp;
    use dagrel_core::dag::StorageFormat;
    use dagrel_core::id::NodeId;

    fn plan_with(schema: Option<&str>, caster: CasterKind) -> (LogicalPlan, NodeId) {
        let mut plan = LogicalPlan::default();
        let id = plan
            .add(
                "A",
                LogicalOp::Load {
                    location: "a".into(),
                    format: StorageFormat::Text,
                    delimiter: None,
                    declared: schema.map(|s| s.parse().unwrap()),
                    caster,
                },
                vec![],
            )
            .unwrap();
        (plan, id)
    }

    #[test]
    fn bytearray_meets_int_gets_cast_with_load_caster() {
        let (plan, id) = plan_with(Some("a, b:int"), CasterKind::Binary);
        let scope = Scope::new(&plan, plan.schema(id), plan.lineage(id));
        let b = scope.bind(&Expr::equals(Expr::col("a"), Expr::col("b"))).unwrap();
        let Expr::Binary { left, .. } = &b.expr else {
            panic!("expected binary, got {}", b.expr)
        };
        match left.as_ref() {
            Expr::Cast { to, caster, .. } => {
                assert_eq!(to.0.data_type, DataType::Int32);
                assert_eq!(*caster, Some(CasterKind::Binary));
            }
            other => panic!("expected cast, got {other}"),
        }
    }

    #[test]
    fn bytearray_arithmetic_is_double() {
        let (plan, id) = plan_with(None, CasterKind::Utf8);
        let scope = Scope::new(&plan, plan.schema(id), plan.lineage(id));
        let b = scope
            .bind(&Expr::binary(BinaryOp::Add, Expr::pos(0), Expr::pos(1)))
            .unwrap();
        assert_eq!(b.field.data_type, DataType::Float64);
    }

    #[test]
    fn chararray_vs_int_is_type_error() {
        let (plan, id) = plan_with(Some("s:chararray, n:int"), CasterKind::Utf8);
        let scope = Scope::new(&plan, plan.schema(id), plan.lineage(id));
        let err = scope.bind(&Expr::equals(Expr::col("s"), Expr::col("n"))).unwrap_err();
        assert_eq!(err.code(), 1039);
    }

    #[test]
    fn out_of_range_position_on_known_schema() {
        let (plan, id) = plan_with(Some("a, b"), CasterKind::Utf8);
        let scope = Scope::new(&plan, plan.schema(id), plan.lineage(id));
        let err = scope.bind(&Expr::pos(5)).unwrap_err();
        assert!(err.to_string().contains("Out of bound access"));
        let scope = Scope::new(&plan, None, plan.lineage(id));
        assert_eq!(scope.bind(&Expr::pos(5)).unwrap().field.data_type, DataType::ByteArray);
    }

    #[test]
    fn star_expands_into_arguments() {
        let (plan, id) = plan_with(Some("a:chararray, b:chararray"), CasterKind::Utf8);
        let scope = Scope::new(&plan, plan.schema(id), plan.lineage(id));
        let b = scope.bind(&Expr::func("concat", vec![Expr::Star])).unwrap();
        match &b.expr {
            Expr::Func { name, args } => {
                assert_eq!(name, "CONCAT");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected func, got {other}"),
        }
        assert!(scope.bind(&Expr::Star).is_err());
    }
}
