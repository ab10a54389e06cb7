//! Bound plan fragments shared by the planner and the operators.
//!
//! Everything here is already resolved: column references are positions,
//! nested aliases are [`Expr::Local`] slots, and implicit casts carry the
//! caster they must use. The planner produces these; operators only
//! evaluate them.

use serde::{Deserialize, Serialize};

use crate::codec::CasterKind;
use crate::expr::Expr;
use crate::schema::Field;
use crate::value::SortKey;

/// Coerce an output field into a declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCast {
    pub to: Field,
    pub caster: CasterKind,
}

/// A nested statement of a foreach inner plan.
///
/// Relational statements take a bag-valued `input` and produce a bag; their
/// predicates and keys address the bag's element tuples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InnerOp {
    Expr(Expr),
    Filter { input: Expr, predicate: Expr },
    Order { input: Expr, keys: Vec<SortKey> },
    Limit { input: Expr, count: u64 },
}

impl InnerOp {
    /// Expression evaluated against the outer row (and earlier locals).
    pub fn source(&self) -> &Expr {
        match self {
            InnerOp::Expr(e) => e,
            InnerOp::Filter { input, .. }
            | InnerOp::Order { input, .. }
            | InnerOp::Limit { input, .. } => input,
        }
    }

    pub fn is_relational(&self) -> bool {
        !matches!(self, InnerOp::Expr(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerStmt {
    pub alias: String,
    pub op: InnerOp,
    /// Type of the value bound to `alias`.
    pub field: Field,
}

/// One generate item after binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenItem {
    pub expr: Expr,
    pub flatten: bool,
    /// Output fields contributed by this item; empty when a flattened
    /// value has no known element schema.
    pub fields: Vec<Field>,
    /// Per output field, the cast requested by an `as` clause.
    #[serde(default)]
    pub casts: Vec<Option<FieldCast>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InnerPlan {
    pub stmts: Vec<InnerStmt>,
    pub generate: Vec<GenItem>,
}

impl InnerPlan {
    pub fn has_flatten(&self) -> bool {
        self.generate.iter().any(|g| g.flatten)
    }

    /// Every expression evaluated against the outer row.
    pub fn outer_exprs(&self) -> impl Iterator<Item = &Expr> {
        self.stmts
            .iter()
            .map(|s| s.op.source())
            .chain(self.generate.iter().map(|g| &g.expr))
    }

    /// Every expression in the plan, including nested predicates.
    pub fn all_exprs(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = self.outer_exprs().collect();
        for s in &self.stmts {
            if let InnerOp::Filter { predicate, .. } = &s.op {
                out.push(predicate);
            }
        }
        out
    }
}

/// A map-side step applied to every partition of a stage, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeOp {
    Filter { predicate: Expr },
    Foreach { plan: InnerPlan },
    /// Per-partition cap ahead of a global limit.
    LocalLimit { count: u64 },
}

impl PipeOp {
    pub fn name(&self) -> &'static str {
        match self {
            PipeOp::Filter { .. } => "filter",
            PipeOp::Foreach { .. } => "foreach",
            PipeOp::LocalLimit { .. } => "local-limit",
        }
    }

    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            PipeOp::Filter { predicate } => vec![predicate],
            PipeOp::Foreach { plan } => plan.all_exprs(),
            PipeOp::LocalLimit { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    #[test]
    fn exprs_cover_nested_predicates() {
        let plan = InnerPlan {
            stmts: vec![InnerStmt {
                alias: "F".into(),
                op: InnerOp::Filter {
                    input: Expr::pos(1),
                    predicate: Expr::lt(Expr::pos(0), Expr::scalar("s", "$0")),
                },
                field: Field::bag(Some("F".into()), None),
            }],
            generate: vec![GenItem {
                expr: Expr::Local(0),
                flatten: true,
                fields: vec![Field::unnamed(DataType::ByteArray)],
                casts: vec![None],
            }],
        };
        assert!(plan.has_flatten());
        assert_eq!(plan.outer_exprs().count(), 2);
        let scalars: Vec<_> = plan
            .all_exprs()
            .iter()
            .flat_map(|e| e.scalar_relations())
            .collect();
        assert_eq!(scalars, vec!["s".to_string()]);
    }
}
