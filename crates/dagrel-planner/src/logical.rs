//! Logical plan arena.
//!
//! Nodes live in one vector and reference their inputs by [`NodeId`]; rewrite
//! passes move edges around without reallocating nodes. Output schemas and
//! lineage are not stored on the nodes: they are derived from each node's
//! parameters and its inputs, and [`LogicalPlan::refresh`] recomputes the
//! side tables after every rewrite.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use dagrel_core::codec::CasterKind;
use dagrel_core::dag::{JoinStrategy, JoinType, StorageFormat};
use dagrel_core::error::{Error, Result};
use dagrel_core::expr::Expr;
use dagrel_core::id::NodeId;
use dagrel_core::plan::InnerPlan;
use dagrel_core::schema::{Field, Schema};
use dagrel_core::value::SortKey;

use crate::lineage::{self, NodeLineage, TagAllocator};

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOp {
    Load {
        location: String,
        format: StorageFormat,
        delimiter: Option<char>,
        declared: Option<Schema>,
        caster: CasterKind,
    },
    Filter {
        predicate: Expr,
    },
    Foreach {
        plan: InnerPlan,
    },
    Group {
        /// Key expressions per input; empty for `group all`.
        keys: Vec<Vec<Expr>>,
        key_field: Field,
        /// Bag column names, one per input.
        names: Vec<String>,
        all: bool,
        partitioner: Option<String>,
        parallel: Option<usize>,
        /// Rows each group bag needs to keep, when a consumer only reads a prefix.
        per_key_limits: Vec<Option<u64>>,
    },
    Join {
        keys: Vec<Vec<Expr>>,
        qualifiers: Vec<String>,
        strategy: JoinStrategy,
        join_type: JoinType,
        partitioner: Option<String>,
        parallel: Option<usize>,
    },
    Union {
        /// Per input, the projection that casts it to the merged schema.
        casts: Vec<Option<Vec<Expr>>>,
    },
    Order {
        keys: Vec<SortKey>,
        parallel: Option<usize>,
        partitioner: Option<String>,
        /// Fused top-K bound.
        limit: Option<u64>,
    },
    Limit {
        count: u64,
    },
    Cross {
        qualifiers: Vec<String>,
        partitioner: Option<String>,
        parallel: Option<usize>,
    },
    Store {
        location: String,
        format: StorageFormat,
        delimiter: Option<char>,
    },
}

impl LogicalOp {
    pub fn kind(&self) -> &'static str {
        match self {
            LogicalOp::Load { .. } => "load",
            LogicalOp::Filter { .. } => "filter",
            LogicalOp::Foreach { .. } => "foreach",
            LogicalOp::Group { keys, .. } if keys.len() > 1 => "cogroup",
            LogicalOp::Group { .. } => "group",
            LogicalOp::Join { .. } => "join",
            LogicalOp::Union { .. } => "union",
            LogicalOp::Order { .. } => "order",
            LogicalOp::Limit { .. } => "limit",
            LogicalOp::Cross { .. } => "cross",
            LogicalOp::Store { .. } => "store",
        }
    }

    /// Every bound expression held by this operator.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            LogicalOp::Filter { predicate } => vec![predicate],
            LogicalOp::Foreach { plan } => plan.all_exprs(),
            LogicalOp::Group { keys, .. } | LogicalOp::Join { keys, .. } => {
                keys.iter().flatten().collect()
            }
            LogicalOp::Union { casts } => casts.iter().flatten().flatten().collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Unique within the plan: the alias, or `alias#id` once the alias is reused.
    pub name: String,
    pub alias: String,
    pub op: LogicalOp,
    pub inputs: Vec<NodeId>,
    /// Relations this node reads as scalars.
    pub scalars: Vec<NodeId>,
    pub removed: bool,
}

/// Derived per-node data.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// `None` when the relation has no known schema.
    pub schema: Option<Schema>,
    pub lineage: NodeLineage,
}

#[derive(Debug, Default)]
pub struct LogicalPlan {
    nodes: Vec<Node>,
    infos: Vec<NodeInfo>,
    aliases: BTreeMap<String, NodeId>,
    outputs: Vec<NodeId>,
    scalar_sources: BTreeSet<NodeId>,
    pub(crate) tags: TagAllocator,
}

impl LogicalPlan {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.removed)
    }

    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self, id: NodeId) -> &NodeInfo {
        &self.infos[id.index()]
    }

    pub fn schema(&self, id: NodeId) -> Option<&Schema> {
        self.info(id).schema.as_ref()
    }

    pub fn lineage(&self, id: NodeId) -> &NodeLineage {
        &self.info(id).lineage
    }

    /// Latest node defined under `alias`.
    pub fn alias(&self, alias: &str) -> Option<NodeId> {
        self.aliases.get(alias).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes().find(|n| n.name == name).map(|n| n.id)
    }

    /// Stores and explicitly requested relations.
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn scalar_sources(&self) -> &BTreeSet<NodeId> {
        &self.scalar_sources
    }

    pub(crate) fn set_scalar_sources(&mut self, set: BTreeSet<NodeId>) {
        self.scalar_sources = set;
    }

    pub(crate) fn add(&mut self, alias: &str, op: LogicalOp, inputs: Vec<NodeId>) -> Result<NodeId> {
        let id = NodeId::new(self.nodes.len() as u64);
        let name = if self.by_name(alias).is_some() {
            format!("{alias}#{}", id.get())
        } else {
            alias.to_string()
        };
        let mut scalars = Vec::new();
        for e in op.exprs() {
            for rel in e.scalar_relations() {
                let sid = self
                    .by_name(&rel)
                    .ok_or_else(|| Error::Plan(format!("undefined scalar relation '{rel}'")))?;
                if !scalars.contains(&sid) {
                    scalars.push(sid);
                }
            }
        }
        self.nodes.push(Node {
            id,
            name,
            alias: alias.to_string(),
            op,
            inputs,
            scalars,
            removed: false,
        });
        self.infos.push(NodeInfo::default());
        let info = self.derive(id)?;
        self.infos[id.index()] = info;
        self.aliases.insert(alias.to_string(), id);
        Ok(id)
    }

    pub(crate) fn add_output(&mut self, id: NodeId) {
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
    }

    /// Live nodes reading `id`, once per edge.
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .flat_map(|n| n.inputs.iter().filter(move |&&i| i == id).map(move |_| n.id))
            .collect()
    }

    fn scalar_users(&self, id: NodeId) -> usize {
        self.nodes().filter(|n| n.scalars.contains(&id)).count()
    }

    /// Consumers plus output requests plus scalar reads.
    pub fn use_count(&self, id: NodeId) -> usize {
        self.consumers(id).len()
            + self.outputs.iter().filter(|&&o| o == id).count()
            + self.scalar_users(id)
    }

    pub fn is_scalar_source(&self, id: NodeId) -> bool {
        self.scalar_users(id) > 0
    }

    /// Nodes whose own output is observed from outside the dataflow edges.
    pub fn is_pinned(&self, id: NodeId) -> bool {
        self.outputs.contains(&id) || self.scalar_users(id) > 0
    }

    /// Point every use of `old` (edges, outputs, aliases) at `new`.
    pub(crate) fn replace_uses(&mut self, old: NodeId, new: NodeId) {
        for n in self.nodes.iter_mut().filter(|n| !n.removed && n.id != new) {
            for i in n.inputs.iter_mut().filter(|i| **i == old) {
                *i = new;
            }
        }
        for o in self.outputs.iter_mut().filter(|o| **o == old) {
            *o = new;
        }
        for v in self.aliases.values_mut().filter(|v| **v == old) {
            *v = new;
        }
    }

    /// Live nodes with every input (and scalar source) before its consumers.
    pub fn topo_order(&self) -> Vec<NodeId> {
        fn visit(plan: &LogicalPlan, id: NodeId, seen: &mut [bool], out: &mut Vec<NodeId>) {
            if seen[id.index()] {
                return;
            }
            seen[id.index()] = true;
            let node = plan.node(id);
            for &dep in node.inputs.iter().chain(node.scalars.iter()) {
                visit(plan, dep, seen, out);
            }
            out.push(id);
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::with_capacity(self.nodes.len());
        for n in self.nodes() {
            visit(self, n.id, &mut seen, &mut out);
        }
        out
    }

    /// Ancestors of the outputs (and of the scalars they read), in topological order.
    pub fn needed(&self) -> Vec<NodeId> {
        let mut keep = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = self.outputs.clone();
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut keep[id.index()], true) {
                continue;
            }
            let n = self.node(id);
            stack.extend(n.inputs.iter().chain(n.scalars.iter()).copied());
        }
        self.topo_order()
            .into_iter()
            .filter(|id| keep[id.index()])
            .collect()
    }

    /// Recompute schemas and lineage for every live node.
    pub fn refresh(&mut self) -> Result<()> {
        self.tags.reset();
        for id in self.topo_order() {
            let info = self.derive(id)?;
            self.infos[id.index()] = info;
        }
        Ok(())
    }

    fn derive(&self, id: NodeId) -> Result<NodeInfo> {
        let node = self.node(id);
        let inputs: Vec<&NodeInfo> = node.inputs.iter().map(|&i| self.info(i)).collect();
        let first = || inputs.first().map(|i| (*i).clone()).unwrap_or_default();
        let tags = &self.tags;
        let info = match &node.op {
            LogicalOp::Load {
                declared, caster, ..
            } => NodeInfo {
                schema: declared.clone(),
                lineage: lineage::load(id, declared.as_ref(), *caster, tags),
            },
            LogicalOp::Filter { .. }
            | LogicalOp::Order { .. }
            | LogicalOp::Limit { .. }
            | LogicalOp::Store { .. } => first(),
            LogicalOp::Foreach { plan } => {
                let input = first();
                let known = !plan.generate.iter().any(|g| g.flatten && g.fields.is_empty());
                let schema = known.then(|| {
                    Schema::new(plan.generate.iter().flat_map(|g| g.fields.iter().cloned()).collect())
                });
                NodeInfo {
                    schema,
                    lineage: lineage::foreach(plan, &input.lineage, known, tags),
                }
            }
            LogicalOp::Group {
                keys,
                key_field,
                names,
                ..
            } => {
                let mut fields = vec![key_field.clone()];
                for (name, input) in names.iter().zip(&inputs) {
                    fields.push(Field::bag(Some(name.clone()), input.schema.clone()));
                }
                let lins: Vec<&NodeLineage> = inputs.iter().map(|i| &i.lineage).collect();
                NodeInfo {
                    schema: Some(Schema::new(fields)),
                    lineage: lineage::group(keys, &lins, tags),
                }
            }
            LogicalOp::Join { qualifiers, .. } | LogicalOp::Cross { qualifiers, .. } => {
                let schema = inputs
                    .iter()
                    .zip(qualifiers)
                    .map(|(i, q)| i.schema.as_ref().map(|s| s.qualify(q)))
                    .collect::<Option<Vec<Schema>>>()
                    .map(|parts| Schema::concat(&parts));
                let lins: Vec<&NodeLineage> = inputs.iter().map(|i| &i.lineage).collect();
                let lineage = lineage::concat(&lins, schema.is_some(), tags);
                NodeInfo { schema, lineage }
            }
            LogicalOp::Union { .. } => {
                let schemas: Option<Vec<&Schema>> = inputs.iter().map(|i| i.schema.as_ref()).collect();
                let schema = match schemas {
                    Some(list) => Some(merge_all(&list)?),
                    None => None,
                };
                let lins: Vec<&NodeLineage> = inputs.iter().map(|i| &i.lineage).collect();
                let lineage = lineage::union(&lins, schema.as_ref().map(Schema::len), tags);
                NodeInfo { schema, lineage }
            }
        };
        Ok(info)
    }

    /// Output schema of the latest relation named `alias`.
    pub fn describe(&self, alias: &str) -> Result<Option<Schema>> {
        let id = self
            .alias(alias)
            .ok_or_else(|| Error::Plan(format!("undefined alias '{alias}'")))?;
        Ok(self.schema(id).cloned())
    }

    /// Element schema of a relational alias nested inside a foreach.
    pub fn describe_nested(&self, alias: &str, nested: &str) -> Result<Option<Schema>> {
        let fail = |reason: &str| Error::NestedAlias {
            alias: alias.to_string(),
            nested: nested.to_string(),
            reason: reason.to_string(),
        };
        let id = self.alias(alias).ok_or_else(|| fail("no such relation"))?;
        let LogicalOp::Foreach { plan } = &self.node(id).op else {
            return Err(fail("relation is not a foreach"));
        };
        let stmt = plan
            .stmts
            .iter()
            .rev()
            .find(|s| s.alias == nested)
            .ok_or_else(|| fail("no such nested alias"))?;
        if !stmt.op.is_relational() {
            return Err(fail("alias is bound to an expression, not a relation"));
        }
        Ok(stmt.field.schema.clone())
    }
}

/// Pairwise left-to-right merge.
pub(crate) fn merge_all(schemas: &[&Schema]) -> Result<Schema> {
    let (first, rest) = schemas
        .split_first()
        .ok_or_else(|| Error::Plan("union needs at least one input".into()))?;
    rest.iter().try_fold((*first).clone(), |acc, s| acc.merge(s))
}

fn render_schema(schema: Option<&Schema>) -> String {
    match schema {
        Some(s) => format!("{{{s}}}"),
        None => "unknown".to_string(),
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.topo_order() {
            let n = self.node(id);
            let inputs: Vec<&str> = n.inputs.iter().map(|&i| self.node(i).name.as_str()).collect();
            write!(f, "{} = {}", n.name, n.op.kind())?;
            if !inputs.is_empty() {
                write!(f, " {}", inputs.join(", "))?;
            }
            match &n.op {
                LogicalOp::Load { location, .. } | LogicalOp::Store { location, .. } => {
                    write!(f, " '{location}'")?
                }
                LogicalOp::Filter { predicate } => write!(f, " by {predicate}")?,
                LogicalOp::Limit { count } => write!(f, " {count}")?,
                LogicalOp::Order { keys, limit, .. } => {
                    let keys: Vec<String> = keys
                        .iter()
                        .map(|k| format!("${}{}", k.column, if k.descending { " desc" } else { "" }))
                        .collect();
                    write!(f, " by {}", keys.join(", "))?;
                    if let Some(l) = limit {
                        write!(f, " top {l}")?;
                    }
                }
                LogicalOp::Join { strategy, join_type, .. } => {
                    write!(f, " using {} ({join_type:?})", strategy.name())?
                }
                _ => {}
            }
            writeln!(f, " -> {}", render_schema(self.schema(id)))?;
        }
        Ok(())
    }
}
