//! Column lineage side table.
//!
//! Every output column of every node carries a tag. A column that is a plain
//! projection of an input column keeps that column's tag; anything computed
//! gets a fresh one. Join, cross and cogroup retag a column when an earlier
//! input already exposed the same tag, so two paths back to one load stay
//! distinguishable. The origin records which load produced the bytes, and
//! with it the caster that must be used to cast them.

use std::cell::Cell;
use std::collections::HashSet;

use dagrel_core::codec::CasterKind;
use dagrel_core::expr::{ColumnRef, Expr};
use dagrel_core::id::NodeId;
use dagrel_core::plan::InnerPlan;
use dagrel_core::schema::{Field, Schema};

pub type LineageTag = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub load: NodeId,
    pub caster: CasterKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLineage {
    pub tag: LineageTag,
    pub origin: Option<Origin>,
    /// Lineage of tuple fields or bag element fields.
    pub nested: Vec<ColumnLineage>,
}

/// Lineage of one node's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLineage {
    pub columns: Vec<ColumnLineage>,
    /// Origin of columns past the known ones (relations without a schema).
    pub rest: Option<Origin>,
}

#[derive(Debug, Default)]
pub struct TagAllocator {
    next: Cell<LineageTag>,
}

impl TagAllocator {
    pub fn fresh(&self) -> LineageTag {
        let t = self.next.get();
        self.next.set(t + 1);
        t
    }

    pub fn reset(&self) {
        self.next.set(0);
    }
}

impl ColumnLineage {
    pub fn fresh(tags: &TagAllocator, origin: Option<Origin>) -> Self {
        Self {
            tag: tags.fresh(),
            origin,
            nested: Vec::new(),
        }
    }

    fn retagged(&self, tags: &TagAllocator) -> Self {
        Self {
            tag: tags.fresh(),
            origin: self.origin,
            nested: self.nested.clone(),
        }
    }
}

impl NodeLineage {
    pub fn column(&self, pos: usize) -> Option<&ColumnLineage> {
        self.columns.get(pos)
    }

    pub fn origin(&self, pos: usize) -> Option<Origin> {
        match self.columns.get(pos) {
            Some(c) => c.origin,
            None => self.rest,
        }
    }

    /// The single origin shared by every column, if there is one.
    pub fn common_origin(&self) -> Option<Origin> {
        if self.rest.is_some() {
            return self.rest;
        }
        let first = self.columns.first()?.origin;
        self.columns
            .iter()
            .all(|c| c.origin == first)
            .then_some(first)
            .flatten()
    }

    /// True when every position carries the same tag.
    pub fn same_tag(&self, positions: &[usize]) -> bool {
        let mut tags = positions.iter().map(|&p| self.columns.get(p).map(|c| c.tag));
        match tags.next() {
            Some(Some(first)) => tags.all(|t| t == Some(first)),
            _ => false,
        }
    }
}

fn field_lineage(field: &Field, origin: Option<Origin>, tags: &TagAllocator) -> ColumnLineage {
    ColumnLineage {
        tag: tags.fresh(),
        origin,
        nested: field
            .schema
            .iter()
            .flat_map(|s| s.iter())
            .map(|f| field_lineage(f, origin, tags))
            .collect(),
    }
}

pub fn load(
    id: NodeId,
    declared: Option<&Schema>,
    caster: CasterKind,
    tags: &TagAllocator,
) -> NodeLineage {
    let origin = Some(Origin { load: id, caster });
    match declared {
        Some(schema) => NodeLineage {
            columns: schema
                .iter()
                .map(|f| field_lineage(f, origin, tags))
                .collect(),
            rest: None,
        },
        None => NodeLineage {
            columns: Vec::new(),
            rest: origin,
        },
    }
}

fn dedup(columns: &[ColumnLineage], seen: &mut HashSet<LineageTag>, tags: &TagAllocator) -> Vec<ColumnLineage> {
    columns
        .iter()
        .map(|c| {
            if seen.insert(c.tag) {
                c.clone()
            } else {
                c.retagged(tags)
            }
        })
        .collect()
}

fn shared_rest(inputs: &[&NodeLineage]) -> Option<Origin> {
    let first = inputs.first()?.common_origin();
    inputs
        .iter()
        .all(|l| l.common_origin() == first)
        .then_some(first)
        .flatten()
}

/// Join and cross output: inputs side by side.
pub fn concat(inputs: &[&NodeLineage], known: bool, tags: &TagAllocator) -> NodeLineage {
    if !known {
        return NodeLineage {
            columns: Vec::new(),
            rest: shared_rest(inputs),
        };
    }
    let mut seen = HashSet::new();
    let columns = inputs
        .iter()
        .flat_map(|l| dedup(&l.columns, &mut seen, tags))
        .collect();
    NodeLineage {
        columns,
        rest: None,
    }
}

pub fn union(inputs: &[&NodeLineage], arity: Option<usize>, tags: &TagAllocator) -> NodeLineage {
    let Some(arity) = arity else {
        return NodeLineage {
            columns: Vec::new(),
            rest: shared_rest(inputs),
        };
    };
    let columns = (0..arity)
        .map(|pos| {
            let cols: Vec<Option<&ColumnLineage>> = inputs.iter().map(|l| l.column(pos)).collect();
            match cols.first().copied().flatten() {
                Some(first) if cols.iter().all(|c| c.map(|c| c.tag) == Some(first.tag)) => {
                    first.clone()
                }
                first => {
                    let origin = first.and_then(|f| f.origin);
                    let same = cols.iter().all(|c| c.and_then(|c| c.origin) == origin);
                    ColumnLineage::fresh(tags, if same { origin } else { None })
                }
            }
        })
        .collect();
    NodeLineage {
        columns,
        rest: None,
    }
}

/// Lineage of a bound expression over `input`, with nested aliases `locals`.
pub fn expr(
    e: &Expr,
    input: &NodeLineage,
    locals: &[ColumnLineage],
    tags: &TagAllocator,
) -> ColumnLineage {
    match e {
        Expr::Col(ColumnRef::Position(p)) => input
            .column(*p)
            .cloned()
            .unwrap_or_else(|| ColumnLineage::fresh(tags, input.rest)),
        Expr::Local(i) => locals
            .get(*i)
            .cloned()
            .unwrap_or_else(|| ColumnLineage::fresh(tags, None)),
        Expr::Cast { expr: inner, .. } => {
            let inner = expr(inner, input, locals, tags);
            ColumnLineage {
                tag: tags.fresh(),
                origin: inner.origin,
                nested: inner.nested,
            }
        }
        Expr::Project { expr: inner, cols } => {
            let inner = expr(inner, input, locals, tags);
            let nested: Vec<ColumnLineage> = cols
                .iter()
                .map(|c| {
                    let hit = match c {
                        ColumnRef::Position(p) => inner.nested.get(*p).cloned(),
                        ColumnRef::Name(_) => None,
                    };
                    hit.unwrap_or_else(|| ColumnLineage::fresh(tags, inner.origin))
                })
                .collect();
            ColumnLineage {
                tag: tags.fresh(),
                origin: inner.origin,
                nested,
            }
        }
        Expr::MapLookup { expr: inner, .. } => {
            let inner = expr(inner, input, locals, tags);
            ColumnLineage::fresh(tags, inner.origin)
        }
        Expr::BinCond { then, otherwise, .. } => {
            let a = expr(then, input, locals, tags);
            let b = expr(otherwise, input, locals, tags);
            let origin = if a.origin == b.origin { a.origin } else { None };
            ColumnLineage::fresh(tags, origin)
        }
        _ => ColumnLineage::fresh(tags, None),
    }
}

/// Lineage of nested aliases, in statement order.
pub fn locals(plan: &InnerPlan, input: &NodeLineage, tags: &TagAllocator) -> Vec<ColumnLineage> {
    let mut out: Vec<ColumnLineage> = Vec::with_capacity(plan.stmts.len());
    for stmt in &plan.stmts {
        let l = expr(stmt.op.source(), input, &out, tags);
        out.push(l);
    }
    out
}

pub fn foreach(plan: &InnerPlan, input: &NodeLineage, known: bool, tags: &TagAllocator) -> NodeLineage {
    let locals = locals(plan, input, tags);
    let mut columns = Vec::new();
    let mut rest = None;
    for item in &plan.generate {
        let l = expr(&item.expr, input, &locals, tags);
        if !item.flatten {
            columns.push(l);
            continue;
        }
        if item.fields.is_empty() {
            rest = rest.or(l.origin);
            continue;
        }
        if l.nested.is_empty() && item.fields.len() == 1 {
            columns.push(l);
            continue;
        }
        for j in 0..item.fields.len() {
            columns.push(
                l.nested
                    .get(j)
                    .cloned()
                    .unwrap_or_else(|| ColumnLineage::fresh(tags, l.origin)),
            );
        }
    }
    if known {
        NodeLineage {
            columns,
            rest: None,
        }
    } else {
        NodeLineage {
            columns: Vec::new(),
            rest: rest.or(input.common_origin()),
        }
    }
}

/// Group/cogroup output: the key column, then one bag per input.
pub fn group(keys: &[Vec<Expr>], inputs: &[&NodeLineage], tags: &TagAllocator) -> NodeLineage {
    let key = match (keys.first(), inputs.first()) {
        (Some(k), Some(input)) if k.len() == 1 => {
            let l = expr(&k[0], input, &[], tags);
            ColumnLineage::fresh(tags, l.origin)
        }
        (Some(k), Some(input)) if k.len() > 1 => ColumnLineage {
            tag: tags.fresh(),
            origin: None,
            nested: k.iter().map(|e| expr(e, input, &[], tags)).collect(),
        },
        _ => ColumnLineage::fresh(tags, None),
    };
    let mut seen = HashSet::new();
    let mut columns = vec![key];
    for input in inputs {
        columns.push(ColumnLineage {
            tag: tags.fresh(),
            origin: input.common_origin(),
            nested: dedup(&input.columns, &mut seen, tags),
        });
    }
    NodeLineage {
        columns,
        rest: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(s: &str) -> Schema {
        s.parse().unwrap()
    }

    #[test]
    fn self_join_sides_get_distinct_tags() {
        let tags = TagAllocator::default();
        let a = load(NodeId::new(0), Some(&schema("x, y")), CasterKind::Utf8, &tags);
        let joined = concat(&[&a, &a], true, &tags);
        assert_eq!(joined.columns.len(), 4);
        assert!(!joined.same_tag(&[0, 2]));
        assert_eq!(joined.origin(2), a.origin(0));
    }

    #[test]
    fn projection_keeps_tag_and_cast_keeps_origin() {
        let tags = TagAllocator::default();
        let a = load(NodeId::new(3), Some(&schema("x, y")), CasterKind::Binary, &tags);
        let same = expr(&Expr::pos(1), &a, &[], &tags);
        assert_eq!(same.tag, a.columns[1].tag);
        let cast = expr(&Expr::cast_to(Expr::pos(1), dagrel_core::schema::DataType::Int32), &a, &[], &tags);
        assert_ne!(cast.tag, same.tag);
        assert_eq!(cast.origin.map(|o| o.caster), Some(CasterKind::Binary));
    }

    #[test]
    fn unknown_schema_uses_rest_origin() {
        let tags = TagAllocator::default();
        let a = load(NodeId::new(1), None, CasterKind::Utf8, &tags);
        assert!(a.columns.is_empty());
        assert_eq!(a.origin(7).map(|o| o.load), Some(NodeId::new(1)));
        let l = expr(&Expr::pos(7), &a, &[], &tags);
        assert_eq!(l.origin.map(|o| o.caster), Some(CasterKind::Utf8));
    }
}
