//! Expression AST used by filter predicates, foreach generate lists, group
//! and join keys, and nested inner-plan statements.
//!
//! Expressions arrive from the front end with column references by name or
//! position; the planner binds every name to a position (or to a nested
//! alias, [`Expr::Local`]) before anything is evaluated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::CasterKind;
use crate::error::Error;
use crate::schema::{DataType, Field};
use crate::value::Value;

/// Column reference: `$N` (position) or a possibly-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Position(usize),
    Name(String),
}

impl ColumnRef {
    /// `"$3"` is a position, anything else a name.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('$').and_then(|d| d.parse().ok()) {
            Some(p) => ColumnRef::Position(p),
            None => ColumnRef::Name(s.to_string()),
        }
    }

    /// Normalize names spelled as `$N` into positions.
    pub fn normalized(&self) -> ColumnRef {
        match self {
            ColumnRef::Name(n) => ColumnRef::parse(n),
            p => p.clone(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Position(p) => write!(f, "${p}"),
            ColumnRef::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Chars(String),
    Boolean(bool),
    Bytes(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Int(v) => Value::Int(*v),
            Literal::Long(v) => Value::Long(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::Double(v) => Value::Double(*v),
            Literal::Chars(s) => Value::Chars(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Bytes(s) => Value::Bytes(s.as_bytes().to_vec()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Null | Literal::Bytes(_) => DataType::ByteArray,
            Literal::Int(_) => DataType::Int32,
            Literal::Long(_) => DataType::Int64,
            Literal::Float(_) => DataType::Float32,
            Literal::Double(_) => DataType::Float64,
            Literal::Chars(_) => DataType::CharArray,
            Literal::Boolean(_) => DataType::Boolean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// A cast target, written as a schema type string (`int`, `bag{(x:int)}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeSpec(pub Field);

impl TryFrom<String> for TypeSpec {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        Ok(TypeSpec(s.parse()?))
    }
}

impl From<TypeSpec> for String {
    fn from(t: TypeSpec) -> String {
        t.0.type_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Col(ColumnRef),
    /// Nested alias defined earlier in the same inner plan.
    Local(usize),
    Lit(Literal),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        #[serde(default)]
        negated: bool,
    },
    Cast {
        expr: Box<Expr>,
        to: TypeSpec,
        /// Caster for byte-array operands; chosen by the planner from the
        /// operand's load origin.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caster: Option<CasterKind>,
    },
    BinCond {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Func {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// Dereference of a tuple or bag (`A.a0`, `t.($0, $1)`).
    Project {
        expr: Box<Expr>,
        cols: Vec<ColumnRef>,
    },
    MapLookup {
        expr: Box<Expr>,
        key: String,
    },
    /// Column of a one-row relation used as a scalar.
    Scalar {
        relation: String,
        column: ColumnRef,
    },
    /// Every input column (only valid as a function argument).
    Star,
}

impl Expr {
    pub fn col(name: &str) -> Expr {
        Expr::Col(ColumnRef::parse(name))
    }

    pub fn pos(p: usize) -> Expr {
        Expr::Col(ColumnRef::Position(p))
    }

    pub fn int(v: i32) -> Expr {
        Expr::Lit(Literal::Int(v))
    }

    pub fn long(v: i64) -> Expr {
        Expr::Lit(Literal::Long(v))
    }

    pub fn chars(s: &str) -> Expr {
        Expr::Lit(Literal::Chars(s.to_string()))
    }

    pub fn null() -> Expr {
        Expr::Lit(Literal::Null)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, left, right)
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Func {
            name: name.to_string(),
            args,
        }
    }

    pub fn cast(expr: Expr, to: Field) -> Expr {
        Expr::Cast {
            expr: Box::new(expr),
            to: TypeSpec(to),
            caster: None,
        }
    }

    pub fn cast_to(expr: Expr, to: DataType) -> Expr {
        Expr::cast(expr, Field::unnamed(to))
    }

    pub fn is_null(expr: Expr, negated: bool) -> Expr {
        Expr::IsNull {
            expr: Box::new(expr),
            negated,
        }
    }

    pub fn bincond(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::BinCond {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn project(expr: Expr, cols: &[&str]) -> Expr {
        Expr::Project {
            expr: Box::new(expr),
            cols: cols.iter().map(|c| ColumnRef::parse(c)).collect(),
        }
    }

    pub fn map_lookup(expr: Expr, key: &str) -> Expr {
        Expr::MapLookup {
            expr: Box::new(expr),
            key: key.to_string(),
        }
    }

    pub fn scalar(relation: &str, column: &str) -> Expr {
        Expr::Scalar {
            relation: relation.to_string(),
            column: ColumnRef::parse(column),
        }
    }

    /// Immediate sub-expressions.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Col(_) | Expr::Local(_) | Expr::Lit(_) | Expr::Scalar { .. } | Expr::Star => {
                Vec::new()
            }
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Not(e) | Expr::Neg(e) => vec![e],
            Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Project { expr, .. }
            | Expr::MapLookup { expr, .. } => vec![expr],
            Expr::BinCond {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            Expr::Func { args, .. } => args.iter().collect(),
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for c in self.children() {
            c.visit(f);
        }
    }

    /// Input positions referenced by a bound expression.
    pub fn columns(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Col(ColumnRef::Position(p)) = e {
                out.push(*p);
            }
        });
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn uses_star(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, Expr::Star));
        found
    }

    pub fn uses_locals(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, Expr::Local(_)));
        found
    }

    /// Relations referenced as scalars.
    pub fn scalar_relations(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Scalar { relation, .. } = e {
                if !out.contains(relation) {
                    out.push(relation.clone());
                }
            }
        });
        out
    }

    /// Rewrite every top-level column position through `f`.
    ///
    /// Positions inside a [`Expr::Project`] list address the dereferenced
    /// value and are left untouched.
    pub fn remap_columns(&self, f: &impl Fn(usize) -> usize) -> Expr {
        let r = |e: &Expr| Box::new(e.remap_columns(f));
        match self {
            Expr::Col(ColumnRef::Position(p)) => Expr::Col(ColumnRef::Position(f(*p))),
            Expr::Col(_) | Expr::Local(_) | Expr::Lit(_) | Expr::Scalar { .. } | Expr::Star => {
                self.clone()
            }
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: r(left),
                right: r(right),
            },
            Expr::Not(e) => Expr::Not(r(e)),
            Expr::Neg(e) => Expr::Neg(r(e)),
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: r(expr),
                negated: *negated,
            },
            Expr::Cast { expr, to, caster } => Expr::Cast {
                expr: r(expr),
                to: to.clone(),
                caster: *caster,
            },
            Expr::BinCond {
                cond,
                then,
                otherwise,
            } => Expr::BinCond {
                cond: r(cond),
                then: r(then),
                otherwise: r(otherwise),
            },
            Expr::Func { name, args } => Expr::Func {
                name: name.clone(),
                args: args.iter().map(|a| a.remap_columns(f)).collect(),
            },
            Expr::Project { expr, cols } => Expr::Project {
                expr: r(expr),
                cols: cols.clone(),
            },
            Expr::MapLookup { expr, key } => Expr::MapLookup {
                expr: r(expr),
                key: key.clone(),
            },
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Col(c) => write!(f, "{c}"),
            Expr::Local(i) => write!(f, "%{i}"),
            Expr::Lit(l) => match l {
                Literal::Chars(s) => write!(f, "'{s}'"),
                Literal::Long(v) => write!(f, "{v}L"),
                Literal::Null => f.write_str("null"),
                other => write!(f, "{}", other.to_value()),
            },
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Not(e) => write!(f, "not {e}"),
            Expr::Neg(e) => write!(f, "-{e}"),
            Expr::IsNull { expr, negated } => {
                write!(f, "{expr} is {}null", if *negated { "not " } else { "" })
            }
            Expr::Cast { expr, to, .. } => write!(f, "({}){expr}", to.0.type_string()),
            Expr::BinCond {
                cond,
                then,
                otherwise,
            } => write!(f, "({cond} ? {then} : {otherwise})"),
            Expr::Func { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Expr::Project { expr, cols } => {
                let cols: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
                if cols.len() == 1 {
                    write!(f, "{expr}.{}", cols[0])
                } else {
                    write!(f, "{expr}.({})", cols.join(", "))
                }
            }
            Expr::MapLookup { expr, key } => write!(f, "{expr}#'{key}'"),
            Expr::Scalar { relation, column } => write!(f, "{relation}.{column}"),
            Expr::Star => f.write_str("*"),
        }
    }
}
