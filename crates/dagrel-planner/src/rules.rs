//! Optimization rules over the logical plan.
//!
//! Each rule performs at most one rewrite per call and reports whether it
//! changed the plan; [`optimize`] reruns the rule list until nothing fires.
//! Rewrites only move nodes whose output nobody else observes (single
//! consumer, not an output, not read as a scalar).

use std::collections::BTreeSet;

use dagrel_core::dag::{JoinStrategy, JoinType};
use dagrel_core::error::{Error, Result};
use dagrel_core::expr::Expr;
use dagrel_core::id::NodeId;
use dagrel_core::plan::{InnerOp, InnerStmt};
use tracing::debug;

use crate::logical::{LogicalOp, LogicalPlan};

const MAX_ROUNDS: usize = 64;

type Rule = fn(&mut LogicalPlan) -> Result<bool>;

const RULES: &[(&str, Rule)] = &[
    ("merge_limits", merge_limits),
    ("fuse_top_k", fuse_top_k),
    ("limit_below_foreach", limit_below_foreach),
    ("push_filters", push_filters),
];

/// Validate, rewrite to a fixpoint, then annotate.
pub fn optimize(mut plan: LogicalPlan) -> Result<LogicalPlan> {
    validate_partitioners(&plan)?;
    for round in 0..MAX_ROUNDS {
        let mut changed = false;
        for (name, rule) in RULES {
            if rule(&mut plan)? {
                debug!(rule = name, round, "rewrite applied");
                plan.refresh()?;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    annotate_package(&mut plan);
    mark_scalars(&mut plan);
    plan.refresh()?;
    Ok(plan)
}

/// Custom partitioners are only allowed where the compiled shuffle is a
/// single hash on the key: group, hash join and cross.
pub fn validate_partitioners(plan: &LogicalPlan) -> Result<()> {
    for n in plan.nodes() {
        match &n.op {
            LogicalOp::Join {
                strategy,
                partitioner: Some(_),
                ..
            } if *strategy != JoinStrategy::Hash => {
                return Err(Error::UnsupportedPartitioner {
                    alias: n.alias.clone(),
                    strategy: strategy.name().to_string(),
                })
            }
            LogicalOp::Order {
                partitioner: Some(_),
                ..
            } => {
                return Err(Error::UnsupportedPartitioner {
                    alias: n.alias.clone(),
                    strategy: "order by".to_string(),
                })
            }
            LogicalOp::Join {
                strategy: JoinStrategy::Replicated,
                join_type: JoinType::Right | JoinType::Full,
                ..
            } => {
                return Err(Error::Plan(format!(
                    "replicated join '{}' supports inner and left outer only",
                    n.alias
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// One consumer, and nothing outside the dataflow reads it.
fn private_to(plan: &LogicalPlan, id: NodeId) -> bool {
    plan.use_count(id) == 1 && !plan.is_pinned(id)
}

fn limit_count(op: &LogicalOp) -> Option<u64> {
    match op {
        LogicalOp::Limit { count } => Some(*count),
        _ => None,
    }
}

/// `limit n (limit m X)` becomes `limit min(n, m) X`.
fn merge_limits(plan: &mut LogicalPlan) -> Result<bool> {
    let ids: Vec<NodeId> = plan.nodes().map(|n| n.id).collect();
    for outer in ids {
        let Some(count) = limit_count(&plan.node(outer).op) else {
            continue;
        };
        let Some(&inner) = plan.node(outer).inputs.first() else {
            continue;
        };
        let Some(inner_count) = limit_count(&plan.node(inner).op) else {
            continue;
        };
        if !private_to(plan, inner) {
            continue;
        }
        let below = plan.node(inner).inputs.clone();
        let node = plan.node_mut(outer);
        node.op = LogicalOp::Limit {
            count: count.min(inner_count),
        };
        node.inputs = below;
        plan.node_mut(inner).removed = true;
        return Ok(true);
    }
    Ok(false)
}

/// `limit n (order X)` keeps the limit but bounds the sort to its first n rows.
fn fuse_top_k(plan: &mut LogicalPlan) -> Result<bool> {
    let ids: Vec<NodeId> = plan.nodes().map(|n| n.id).collect();
    for lim in ids {
        let Some(count) = limit_count(&plan.node(lim).op) else {
            continue;
        };
        let Some(&order) = plan.node(lim).inputs.first() else {
            continue;
        };
        if !private_to(plan, order) {
            continue;
        }
        if let LogicalOp::Order { limit, .. } = &mut plan.node_mut(order).op {
            if limit.map_or(true, |l| l > count) {
                *limit = Some(count);
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// `limit n (foreach X)` becomes `foreach (limit n X)` when the foreach
/// emits exactly one row per input row.
fn limit_below_foreach(plan: &mut LogicalPlan) -> Result<bool> {
    let ids: Vec<NodeId> = plan.nodes().map(|n| n.id).collect();
    for lim in ids {
        if limit_count(&plan.node(lim).op).is_none() || plan.is_scalar_source(lim) {
            continue;
        }
        let Some(&fe) = plan.node(lim).inputs.first() else {
            continue;
        };
        let LogicalOp::Foreach { plan: inner } = &plan.node(fe).op else {
            continue;
        };
        if inner.has_flatten() || !private_to(plan, fe) {
            continue;
        }
        let below = plan.node(fe).inputs.clone();
        plan.replace_uses(lim, fe);
        plan.node_mut(fe).inputs = vec![lim];
        plan.node_mut(lim).inputs = below;
        return Ok(true);
    }
    Ok(false)
}

/// Which join input a predicate over `columns` can be evaluated on.
fn filter_side(plan: &LogicalPlan, join: NodeId, columns: &[usize]) -> Option<(usize, usize)> {
    let node = plan.node(join);
    let allowed = |side: usize| match &node.op {
        LogicalOp::Cross { .. } => true,
        LogicalOp::Join { join_type, .. } => match join_type {
            JoinType::Inner => true,
            JoinType::Left => side == 0,
            JoinType::Right => side == 1,
            JoinType::Full => false,
        },
        _ => false,
    };
    let mut offset = 0;
    for (side, &input) in node.inputs.iter().enumerate() {
        let width = plan.schema(input)?.len();
        if columns.iter().all(|&c| c >= offset && c < offset + width) {
            return allowed(side).then_some((side, offset));
        }
        offset += width;
    }
    None
}

/// Move a filter below an order, or onto the join/cross input its
/// predicate reads from.
fn push_filters(plan: &mut LogicalPlan) -> Result<bool> {
    let ids: Vec<NodeId> = plan.nodes().map(|n| n.id).collect();
    for filter in ids {
        let LogicalOp::Filter { predicate } = &plan.node(filter).op else {
            continue;
        };
        let predicate = predicate.clone();
        let columns = predicate.columns();
        let Some(&below) = plan.node(filter).inputs.first() else {
            continue;
        };
        if columns.is_empty() || !private_to(plan, below) {
            continue;
        }
        match &plan.node(below).op {
            LogicalOp::Order { limit: None, .. } => {
                let under = plan.node(below).inputs.clone();
                plan.replace_uses(filter, below);
                plan.node_mut(below).inputs = vec![filter];
                plan.node_mut(filter).inputs = under;
                return Ok(true);
            }
            LogicalOp::Join { .. } | LogicalOp::Cross { .. } => {
                let Some((side, offset)) = filter_side(plan, below, &columns) else {
                    continue;
                };
                let target = plan.node(below).inputs[side];
                let remapped = predicate.remap_columns(&|c| c - offset);
                plan.replace_uses(filter, below);
                plan.node_mut(below).inputs[side] = filter;
                let node = plan.node_mut(filter);
                node.inputs = vec![target];
                node.op = LogicalOp::Filter {
                    predicate: remapped,
                };
                return Ok(true);
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Largest nested limit over bag `column`, if nested limits are its only readers.
fn only_limits_read(stmts: &[InnerStmt], outer: &[&Expr], column: usize) -> Option<u64> {
    let bag = Expr::pos(column);
    let mut max: Option<u64> = None;
    let mut other_use = outer.iter().any(|e| e.columns().contains(&column));
    for s in stmts {
        match &s.op {
            InnerOp::Limit { input, count } if *input == bag => {
                max = Some(max.map_or(*count, |m| m.max(*count)));
            }
            op if op.source().columns().contains(&column) => other_use = true,
            _ => {}
        }
    }
    if other_use {
        None
    } else {
        max
    }
}

/// Annotate a group whose bags are only read through nested limits with a
/// per-key bound; the package step then keeps at most that many rows.
fn annotate_package(plan: &mut LogicalPlan) {
    let ids: Vec<NodeId> = plan.nodes().map(|n| n.id).collect();
    for group in ids {
        let LogicalOp::Group { names, .. } = &plan.node(group).op else {
            continue;
        };
        let bags = names.len();
        if !private_to(plan, group) {
            continue;
        }
        let consumers = plan.consumers(group);
        let [consumer] = consumers.as_slice() else {
            continue;
        };
        let LogicalOp::Foreach { plan: inner } = &plan.node(*consumer).op else {
            continue;
        };
        let generate: Vec<&Expr> = inner.generate.iter().map(|g| &g.expr).collect();
        let limits: Vec<Option<u64>> = (0..bags)
            .map(|i| only_limits_read(&inner.stmts, &generate, i + 1))
            .collect();
        if limits.iter().all(Option::is_none) {
            continue;
        }
        if let LogicalOp::Group { per_key_limits, .. } = &mut plan.node_mut(group).op {
            if *per_key_limits != limits {
                debug!(node = %group, ?limits, "per-key limit annotation");
                *per_key_limits = limits;
            }
        }
    }
}

fn mark_scalars(plan: &mut LogicalPlan) {
    let set: BTreeSet<NodeId> = plan
        .nodes()
        .flat_map(|n| n.scalars.iter().copied())
        .collect();
    plan.set_scalar_sources(set);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use dagrel_core::dag::{GenerateItem, KeyedInput, NestedStmt, OpDag, OpSpec, OrderKey};
    use dagrel_core::expr::BinaryOp;

    fn dag(rels: Vec<(&str, OpSpec)>) -> OpDag {
        let mut d = OpDag::new();
        for (a, op) in rels {
            d.push(a, op);
        }
        d
    }

    fn kinds(plan: &LogicalPlan) -> Vec<&'static str> {
        plan.needed().iter().map(|&id| plan.node(id).op.kind()).collect()
    }

    fn join(strategy: JoinStrategy) -> OpSpec {
        OpSpec::join(
            vec![
                KeyedInput::new("A", vec![Expr::col("x")]),
                KeyedInput::new("B", vec![Expr::col("y")]),
            ],
            strategy,
        )
    }

    fn two_loads() -> Vec<(&'static str, OpSpec)> {
        vec![
            ("A", OpSpec::load("a", Some("x:int, p:int"))),
            ("B", OpSpec::load("b", Some("y:int, q:int"))),
        ]
    }

    #[test]
    fn skewed_join_rejects_partitioner() {
        let mut rels = two_loads();
        rels.push(("J", join(JoinStrategy::Skewed).partition_by("int_mod")));
        let plan = build(&dag(rels), &["J"]).unwrap();
        let err = optimize(plan).unwrap_err();
        assert_eq!(err.code(), 1000);
        assert!(err
            .to_string()
            .contains("custom partitioner not supported for skewed join"));
    }

    #[test]
    fn hash_join_accepts_partitioner() {
        let mut rels = two_loads();
        rels.push(("J", join(JoinStrategy::Hash).partition_by("int_mod")));
        let plan = build(&dag(rels), &["J"]).unwrap();
        assert!(optimize(plan).is_ok());
    }

    #[test]
    fn limit_after_order_becomes_top_k() {
        let d = dag(vec![
            ("A", OpSpec::load("a", Some("x:int"))),
            ("B", OpSpec::order("A", vec![OrderKey::desc("x")])),
            ("C", OpSpec::limit("B", 10)),
            ("D", OpSpec::limit("C", 3)),
        ]);
        let plan = optimize(build(&d, &["D"]).unwrap()).unwrap();
        assert_eq!(kinds(&plan), vec!["load", "order", "limit"]);
        let order = plan.alias("B").unwrap();
        assert!(matches!(
            plan.node(order).op,
            LogicalOp::Order { limit: Some(3), .. }
        ));
    }

    #[test]
    fn limit_moves_below_plain_foreach() {
        let d = dag(vec![
            ("A", OpSpec::load("a", Some("x:int"))),
            ("B", OpSpec::foreach("A", vec![GenerateItem::expr(Expr::col("x"))])),
            ("C", OpSpec::limit("B", 2)),
        ]);
        let plan = optimize(build(&d, &["C"]).unwrap()).unwrap();
        assert_eq!(kinds(&plan), vec!["load", "limit", "foreach"]);
        // the requested output now points at the foreach
        let out = plan.outputs()[0];
        assert_eq!(plan.node(out).op.kind(), "foreach");
    }

    #[test]
    fn filter_pushed_to_join_side_with_remapped_columns() {
        let mut rels = two_loads();
        rels.push(("J", join(JoinStrategy::Hash)));
        rels.push((
            "F",
            OpSpec::filter(
                "J",
                Expr::binary(BinaryOp::Gt, Expr::col("q"), Expr::int(5)),
            ),
        ));
        let plan = optimize(build(&dag(rels), &["F"]).unwrap()).unwrap();
        let out = plan.outputs()[0];
        assert_eq!(plan.node(out).op.kind(), "join");
        let filter = plan.node(out).inputs[1];
        match &plan.node(filter).op {
            LogicalOp::Filter { predicate } => assert_eq!(predicate.columns(), vec![1]),
            other => panic!("expected filter, got {}", other.kind()),
        }
    }

    #[test]
    fn filter_stays_above_null_supplying_side() {
        let mut rels = two_loads();
        rels.push((
            "J",
            join(JoinStrategy::Hash).with_join_type(JoinType::Left),
        ));
        rels.push((
            "F",
            OpSpec::filter("J", Expr::is_null(Expr::col("q"), false)),
        ));
        let plan = optimize(build(&dag(rels), &["F"]).unwrap()).unwrap();
        let out = plan.outputs()[0];
        assert_eq!(plan.node(out).op.kind(), "filter");
    }

    #[test]
    fn nested_limit_annotates_group() {
        let d = dag(vec![
            ("A", OpSpec::load("a", Some("x:int, y:int"))),
            ("B", OpSpec::group("A", vec![Expr::col("x")])),
            (
                "C",
                OpSpec::foreach_nested(
                    "B",
                    vec![NestedStmt::limit("L", "A", 2)],
                    vec![
                        GenerateItem::expr(Expr::col("group")),
                        GenerateItem::flatten(Expr::col("L")),
                    ],
                ),
            ),
        ]);
        let plan = optimize(build(&d, &["C"]).unwrap()).unwrap();
        let group = plan.alias("B").unwrap();
        match &plan.node(group).op {
            LogicalOp::Group { per_key_limits, .. } => assert_eq!(per_key_limits, &vec![Some(2)]),
            other => panic!("expected group, got {}", other.kind()),
        }
    }

    #[test]
    fn bag_read_elsewhere_is_not_annotated() {
        let d = dag(vec![
            ("A", OpSpec::load("a", Some("x:int, y:int"))),
            ("B", OpSpec::group("A", vec![Expr::col("x")])),
            (
                "C",
                OpSpec::foreach_nested(
                    "B",
                    vec![NestedStmt::limit("L", "A", 2)],
                    vec![
                        GenerateItem::expr(Expr::func("COUNT", vec![Expr::col("A")])),
                        GenerateItem::expr(Expr::col("L")),
                    ],
                ),
            ),
        ]);
        let plan = optimize(build(&d, &["C"]).unwrap()).unwrap();
        let group = plan.alias("B").unwrap();
        match &plan.node(group).op {
            LogicalOp::Group { per_key_limits, .. } => assert_eq!(per_key_limits, &vec![None]),
            other => panic!("expected group, got {}", other.kind()),
        }
    }
}
