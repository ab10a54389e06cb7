//! Physical program: a list of stages in dependency order.
//!
//! A stage is one data-parallel unit. Its kind says how partitions are
//! produced from its input stages (scan, shuffle, join, ...); its pipeline
//! is a chain of per-partition steps applied to the result. Filters and
//! foreaches are appended to the stage producing their input whenever
//! nothing else reads that intermediate result.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use dagrel_core::codec::CasterKind;
use dagrel_core::config::EngineConfig;
use dagrel_core::dag::{JoinStrategy, JoinType, StorageFormat};
use dagrel_core::error::{Error, Result};
use dagrel_core::expr::Expr;
use dagrel_core::hash::{hash_serde, Hash256};
use dagrel_core::id::{NodeId, StageId};
use dagrel_core::plan::PipeOp;
use dagrel_core::schema::Schema;
use dagrel_core::value::SortKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logical::{LogicalOp, LogicalPlan};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    Scan {
        location: String,
        format: StorageFormat,
        delimiter: Option<char>,
        schema: Option<Schema>,
        caster: CasterKind,
    },
    /// Per-partition steps over a single input stage.
    Pipe,
    /// Shuffle on the key, then package each key's rows into bags.
    Group {
        keys: Vec<Vec<Expr>>,
        all: bool,
        partitioner: Option<String>,
        parallelism: usize,
        per_key_limits: Vec<Option<u64>>,
    },
    HashJoin {
        keys: Vec<Vec<Expr>>,
        join_type: JoinType,
        partitioner: Option<String>,
        parallelism: usize,
        /// Column count per side, when known; used for null padding.
        widths: Vec<Option<usize>>,
    },
    /// Inputs: left, right, key sample of the left side.
    SkewedJoin {
        keys: Vec<Vec<Expr>>,
        join_type: JoinType,
        parallelism: usize,
        threshold: f64,
        widths: Vec<Option<usize>>,
    },
    MergeJoin {
        keys: Vec<Vec<Expr>>,
        join_type: JoinType,
        widths: Vec<Option<usize>>,
    },
    /// The right side is broadcast to every left partition.
    ReplicatedJoin {
        keys: Vec<Vec<Expr>>,
        join_type: JoinType,
        widths: Vec<Option<usize>>,
    },
    Cross {
        partitioner: Option<String>,
        parallelism: usize,
    },
    /// Seeded key sample of the input, one row per sampled key.
    Sample {
        keys: Vec<Expr>,
        size: usize,
        seed: u64,
    },
    /// Inputs: data, key sample. Range partitioned, sorted per bucket.
    Order {
        keys: Vec<SortKey>,
        parallelism: usize,
        limit: Option<u64>,
    },
    /// Global cap over the concatenated input partitions.
    Limit {
        count: u64,
    },
    Union {
        projections: Vec<Option<Vec<Expr>>>,
    },
    Store {
        location: String,
        format: StorageFormat,
        delimiter: Option<char>,
        /// Written after a shuffle (`part-r-*`) rather than map side (`part-m-*`).
        reduce_side: bool,
    },
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Scan { .. } => "scan",
            StageKind::Pipe => "pipe",
            StageKind::Group { .. } => "group",
            StageKind::HashJoin { .. } => "hash-join",
            StageKind::SkewedJoin { .. } => "skewed-join",
            StageKind::MergeJoin { .. } => "merge-join",
            StageKind::ReplicatedJoin { .. } => "replicated-join",
            StageKind::Cross { .. } => "cross",
            StageKind::Sample { .. } => "sample",
            StageKind::Order { .. } => "order",
            StageKind::Limit { .. } => "limit",
            StageKind::Union { .. } => "union",
            StageKind::Store { .. } => "store",
        }
    }

    /// Stages that redistribute rows by key.
    pub fn is_shuffle(&self) -> bool {
        matches!(
            self,
            StageKind::Group { .. }
                | StageKind::HashJoin { .. }
                | StageKind::SkewedJoin { .. }
                | StageKind::Order { .. }
                | StageKind::Cross { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    /// Names of the logical nodes folded into this stage.
    pub label: String,
    pub kind: StageKind,
    pub inputs: Vec<StageId>,
    pub pipeline: Vec<PipeOp>,
    pub schema: Option<Schema>,
}

/// Stages plus the stages whose output is observed by name.
/// BTreeMaps keep serialization (and so the plan hash) deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalProgram {
    pub stages: Vec<Stage>,
    pub outputs: BTreeMap<String, StageId>,
    pub scalars: BTreeMap<String, StageId>,
}

impl PhysicalProgram {
    pub fn stage(&self, id: StageId) -> &Stage {
        &self.stages[id.index()]
    }

    /// Stable digest of the whole program.
    pub fn plan_hash(&self) -> Result<Hash256> {
        hash_serde(self)
    }

    /// Human-readable stage list.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        for s in &self.stages {
            let inputs: Vec<String> = s.inputs.iter().map(|i| i.get().to_string()).collect();
            let _ = write!(out, "#{} {} [{}]", s.id.get(), s.kind.name(), s.label);
            if !inputs.is_empty() {
                let _ = write!(out, " <- {}", inputs.join(","));
            }
            let _ = write!(out, "{}", detail(&s.kind));
            match &s.schema {
                Some(schema) => {
                    let _ = writeln!(out, " -> {{{schema}}}");
                }
                None => {
                    let _ = writeln!(out, " -> unknown");
                }
            }
            for op in &s.pipeline {
                let _ = writeln!(out, "    | {}", pipe_detail(op));
            }
        }
        for (name, id) in &self.outputs {
            let _ = writeln!(out, "output {name} = #{}", id.get());
        }
        for (name, id) in &self.scalars {
            let _ = writeln!(out, "scalar {name} = #{}", id.get());
        }
        out
    }
}

fn exprs(list: &[Expr]) -> String {
    list.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

fn keyed(keys: &[Vec<Expr>]) -> String {
    keys.iter()
        .map(|k| format!("({})", exprs(k)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn detail(kind: &StageKind) -> String {
    match kind {
        StageKind::Scan {
            location, format, ..
        } => format!(" '{location}' as {format:?}"),
        StageKind::Pipe => String::new(),
        StageKind::Group {
            keys,
            all,
            partitioner,
            parallelism,
            per_key_limits,
        } => {
            let mut s = if *all {
                " all".to_string()
            } else {
                format!(" by {}", keyed(keys))
            };
            let _ = write!(s, " parallel {parallelism}");
            if let Some(p) = partitioner {
                let _ = write!(s, " partition by {p}");
            }
            if per_key_limits.iter().any(Option::is_some) {
                let _ = write!(s, " per-key limits {per_key_limits:?}");
            }
            s
        }
        StageKind::HashJoin {
            keys,
            join_type,
            partitioner,
            parallelism,
            ..
        } => {
            let mut s = format!(" {join_type:?} on {} parallel {parallelism}", keyed(keys));
            if let Some(p) = partitioner {
                let _ = write!(s, " partition by {p}");
            }
            s
        }
        StageKind::SkewedJoin {
            keys,
            join_type,
            parallelism,
            threshold,
            ..
        } => format!(
            " {join_type:?} on {} parallel {parallelism} heavy > {threshold}",
            keyed(keys)
        ),
        StageKind::MergeJoin {
            keys, join_type, ..
        }
        | StageKind::ReplicatedJoin {
            keys, join_type, ..
        } => format!(" {join_type:?} on {}", keyed(keys)),
        StageKind::Cross {
            partitioner,
            parallelism,
        } => match partitioner {
            Some(p) => format!(" parallel {parallelism} partition by {p}"),
            None => format!(" parallel {parallelism}"),
        },
        StageKind::Sample { keys, size, seed } => {
            format!(" ({}) size {size} seed {seed:#x}", exprs(keys))
        }
        StageKind::Order {
            keys,
            parallelism,
            limit,
        } => {
            let keys: Vec<String> = keys
                .iter()
                .map(|k| format!("${}{}", k.column, if k.descending { " desc" } else { "" }))
                .collect();
            let mut s = format!(" by {} parallel {parallelism}", keys.join(", "));
            if let Some(l) = limit {
                let _ = write!(s, " top {l}");
            }
            s
        }
        StageKind::Limit { count } => format!(" {count}"),
        StageKind::Union { projections } => {
            let cast = projections.iter().filter(|p| p.is_some()).count();
            if cast > 0 {
                format!(" ({cast} input(s) cast)")
            } else {
                String::new()
            }
        }
        StageKind::Store {
            location,
            format,
            reduce_side,
            ..
        } => format!(
            " '{location}' as {format:?} ({})",
            if *reduce_side { "reduce" } else { "map" }
        ),
    }
}

fn pipe_detail(op: &PipeOp) -> String {
    match op {
        PipeOp::Filter { predicate } => format!("filter {predicate}"),
        PipeOp::Foreach { plan } => {
            let items: Vec<String> = plan
                .generate
                .iter()
                .map(|g| {
                    if g.flatten {
                        format!("flatten({})", g.expr)
                    } else {
                        g.expr.to_string()
                    }
                })
                .collect();
            if plan.stmts.is_empty() {
                format!("foreach generate {}", items.join(", "))
            } else {
                format!(
                    "foreach {{{} nested}} generate {}",
                    plan.stmts.len(),
                    items.join(", ")
                )
            }
        }
        PipeOp::LocalLimit { count } => format!("local-limit {count}"),
    }
}

struct Compiler<'a> {
    plan: &'a LogicalPlan,
    config: &'a EngineConfig,
    stages: Vec<Stage>,
    /// Last logical node folded into each stage, while it may still grow.
    tails: Vec<Option<NodeId>>,
    at: HashMap<NodeId, StageId>,
}

impl<'a> Compiler<'a> {
    fn stage_of(&self, id: NodeId) -> Result<StageId> {
        self.at
            .get(&id)
            .copied()
            .ok_or_else(|| Error::Invariant(format!("{id} compiled before its input")))
    }

    fn push(
        &mut self,
        label: &str,
        kind: StageKind,
        inputs: Vec<StageId>,
        schema: Option<Schema>,
        tail: Option<NodeId>,
    ) -> StageId {
        let id = StageId::new(self.stages.len() as u64);
        self.stages.push(Stage {
            id,
            label: label.to_string(),
            kind,
            inputs,
            pipeline: Vec::new(),
            schema,
        });
        self.tails.push(tail);
        id
    }

    /// Stage that `input` may be folded into, if any.
    fn appendable(&self, input: NodeId) -> Result<Option<StageId>> {
        let s = self.stage_of(input)?;
        let folds = self.tails[s.index()] == Some(input)
            && self.plan.use_count(input) == 1
            && !self.plan.is_pinned(input);
        Ok(folds.then_some(s))
    }

    fn pipe(&mut self, id: NodeId, op: PipeOp) -> Result<StageId> {
        let plan = self.plan;
        let node = plan.node(id);
        let input = first_input(plan, id)?;
        let schema = plan.schema(id).cloned();
        // Scalars must be materialized before the stage that reads them starts.
        let target = match self.appendable(input)? {
            Some(s) if self.scalars_ready(id, s)? => Some(s),
            _ => None,
        };
        match target {
            Some(s) => {
                let stage = &mut self.stages[s.index()];
                stage.pipeline.push(op);
                stage.schema = schema;
                stage.label = format!("{}+{}", stage.label, node.name);
                self.tails[s.index()] = Some(id);
                Ok(s)
            }
            None => {
                let from = self.stage_of(input)?;
                let s = self.push(&node.name, StageKind::Pipe, vec![from], schema, Some(id));
                self.stages[s.index()].pipeline.push(op);
                Ok(s)
            }
        }
    }

    /// Whether every scalar `id` reads comes from a stage before `stage`.
    fn scalars_ready(&self, id: NodeId, stage: StageId) -> Result<bool> {
        for &src in &self.plan.node(id).scalars {
            if self.stage_of(src)? >= stage {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn widths(&self, id: NodeId) -> Vec<Option<usize>> {
        self.plan
            .node(id)
            .inputs
            .iter()
            .map(|&i| self.plan.schema(i).map(Schema::len))
            .collect()
    }

    fn sample(&mut self, label: &str, from: StageId, keys: Vec<Expr>) -> StageId {
        let kind = StageKind::Sample {
            keys,
            size: self.config.sample_size,
            seed: self.config.seed,
        };
        self.push(&format!("{label}:sample"), kind, vec![from], None, None)
    }

    fn compile_node(&mut self, id: NodeId) -> Result<StageId> {
        let plan = self.plan;
        let node = plan.node(id);
        let schema = plan.schema(id).cloned();
        let inputs = node
            .inputs
            .iter()
            .map(|&i| self.stage_of(i))
            .collect::<Result<Vec<_>>>()?;
        let default_parallelism = self.config.default_parallelism;
        let parallelism = move |p: &Option<usize>| p.unwrap_or(default_parallelism).max(1);
        let label = node.name.as_str();
        let stage = match &node.op {
            LogicalOp::Load {
                location,
                format,
                delimiter,
                declared,
                caster,
            } => {
                let kind = StageKind::Scan {
                    location: location.clone(),
                    format: *format,
                    delimiter: *delimiter,
                    schema: declared.clone(),
                    caster: *caster,
                };
                self.push(label, kind, inputs, schema, Some(id))
            }
            LogicalOp::Filter { predicate } => self.pipe(
                id,
                PipeOp::Filter {
                    predicate: predicate.clone(),
                },
            )?,
            LogicalOp::Foreach { plan: inner } => {
                self.pipe(id, PipeOp::Foreach { plan: inner.clone() })?
            }
            LogicalOp::Group {
                keys,
                all,
                partitioner,
                parallel,
                per_key_limits,
                ..
            } => {
                let kind = StageKind::Group {
                    keys: keys.clone(),
                    all: *all,
                    partitioner: partitioner.clone(),
                    parallelism: if *all { 1 } else { parallelism(parallel) },
                    per_key_limits: per_key_limits.clone(),
                };
                self.push(label, kind, inputs, schema, Some(id))
            }
            LogicalOp::Join {
                keys,
                strategy,
                join_type,
                partitioner,
                parallel,
                ..
            } => {
                let widths = self.widths(id);
                let (kind, inputs) = match strategy {
                    JoinStrategy::Hash => (
                        StageKind::HashJoin {
                            keys: keys.clone(),
                            join_type: *join_type,
                            partitioner: partitioner.clone(),
                            parallelism: parallelism(parallel),
                            widths,
                        },
                        inputs,
                    ),
                    JoinStrategy::Skewed => {
                        let left_keys = keys.first().cloned().unwrap_or_default();
                        let sample = self.sample(label, inputs[0], left_keys);
                        let mut with_sample = inputs;
                        with_sample.push(sample);
                        (
                            StageKind::SkewedJoin {
                                keys: keys.clone(),
                                join_type: *join_type,
                                parallelism: parallelism(parallel),
                                threshold: self.config.skew_threshold,
                                widths,
                            },
                            with_sample,
                        )
                    }
                    JoinStrategy::Merge => (
                        StageKind::MergeJoin {
                            keys: keys.clone(),
                            join_type: *join_type,
                            widths,
                        },
                        inputs,
                    ),
                    JoinStrategy::Replicated => (
                        StageKind::ReplicatedJoin {
                            keys: keys.clone(),
                            join_type: *join_type,
                            widths,
                        },
                        inputs,
                    ),
                };
                self.push(label, kind, inputs, schema, Some(id))
            }
            LogicalOp::Union { casts } => {
                let kind = StageKind::Union {
                    projections: casts.clone(),
                };
                self.push(label, kind, inputs, schema, Some(id))
            }
            LogicalOp::Order {
                keys,
                parallel,
                limit,
                ..
            } => {
                let data = inputs[0];
                let sample_keys = keys.iter().map(|k| Expr::pos(k.column)).collect();
                let sample = self.sample(label, data, sample_keys);
                let kind = StageKind::Order {
                    keys: keys.clone(),
                    parallelism: parallelism(parallel),
                    limit: *limit,
                };
                self.push(label, kind, vec![data, sample], schema, Some(id))
            }
            LogicalOp::Limit { count } => {
                let input = first_input(plan, id)?;
                if let Some(s) = self.appendable(input)? {
                    self.stages[s.index()]
                        .pipeline
                        .push(PipeOp::LocalLimit { count: *count });
                    self.tails[s.index()] = None;
                }
                self.push(label, StageKind::Limit { count: *count }, inputs, schema, Some(id))
            }
            LogicalOp::Cross {
                partitioner,
                parallel,
                ..
            } => {
                let kind = StageKind::Cross {
                    partitioner: partitioner.clone(),
                    parallelism: parallelism(parallel),
                };
                self.push(label, kind, inputs, schema, Some(id))
            }
            LogicalOp::Store {
                location,
                format,
                delimiter,
            } => {
                let reduce_side = inputs
                    .first()
                    .map(|s| self.stages[s.index()].kind.is_shuffle())
                    .unwrap_or(false);
                let kind = StageKind::Store {
                    location: location.clone(),
                    format: *format,
                    delimiter: *delimiter,
                    reduce_side,
                };
                self.push(label, kind, inputs, schema, None)
            }
        };
        Ok(stage)
    }
}

fn first_input(plan: &LogicalPlan, id: NodeId) -> Result<NodeId> {
    plan.node(id)
        .inputs
        .first()
        .copied()
        .ok_or_else(|| Error::Invariant(format!("{id} has no input")))
}

/// Compile the nodes the plan's outputs depend on.
pub fn compile(plan: &LogicalPlan, config: &EngineConfig) -> Result<PhysicalProgram> {
    let mut c = Compiler {
        plan,
        config,
        stages: Vec::new(),
        tails: Vec::new(),
        at: HashMap::new(),
    };
    for id in plan.needed() {
        let stage = c.compile_node(id)?;
        c.at.insert(id, stage);
    }
    let mut outputs = BTreeMap::new();
    for &id in plan.outputs() {
        outputs.insert(plan.node(id).name.clone(), c.stage_of(id)?);
    }
    let mut scalars = BTreeMap::new();
    for &id in plan.scalar_sources() {
        scalars.insert(plan.node(id).name.clone(), c.stage_of(id)?);
    }
    debug!(stages = c.stages.len(), outputs = outputs.len(), "compiled physical program");
    Ok(PhysicalProgram {
        stages: c.stages,
        outputs,
        scalars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::rules::optimize;
    use dagrel_core::dag::{GenerateItem, KeyedInput, OpDag, OpSpec, OrderKey};
    use dagrel_core::expr::BinaryOp;

    fn program(rels: Vec<(&str, OpSpec)>, targets: &[&str]) -> PhysicalProgram {
        let mut d = OpDag::new();
        for (a, op) in rels {
            d.push(a, op);
        }
        let plan = optimize(build(&d, targets).unwrap()).unwrap();
        compile(&plan, &EngineConfig::default()).unwrap()
    }

    fn kinds(p: &PhysicalProgram) -> Vec<&'static str> {
        p.stages.iter().map(|s| s.kind.name()).collect()
    }

    #[test]
    fn map_side_steps_fold_into_scan() {
        let p = program(
            vec![
                ("A", OpSpec::load("a", Some("x:int, y:int"))),
                (
                    "B",
                    OpSpec::filter("A", Expr::binary(BinaryOp::Gt, Expr::col("x"), Expr::int(1))),
                ),
                ("C", OpSpec::foreach("B", vec![GenerateItem::expr(Expr::col("y"))])),
                ("S", OpSpec::store("C", "out", StorageFormat::Text)),
            ],
            &[],
        );
        assert_eq!(kinds(&p), vec!["scan", "store"]);
        assert_eq!(p.stages[0].pipeline.len(), 2);
        assert!(p.explain().contains("| filter"));
        assert!(matches!(
            p.stages[1].kind,
            StageKind::Store {
                reduce_side: false,
                ..
            }
        ));
    }

    #[test]
    fn order_gets_a_sample_stage_and_top_k() {
        let p = program(
            vec![
                ("A", OpSpec::load("a", Some("x:int"))),
                ("B", OpSpec::order("A", vec![OrderKey::asc("x")]).parallel(3)),
                ("C", OpSpec::limit("B", 5)),
            ],
            &["C"],
        );
        assert_eq!(kinds(&p), vec!["scan", "sample", "order", "limit"]);
        assert!(matches!(
            p.stages[2].kind,
            StageKind::Order {
                parallelism: 3,
                limit: Some(5),
                ..
            }
        ));
    }

    #[test]
    fn skewed_join_samples_left_side() {
        let p = program(
            vec![
                ("A", OpSpec::load("a", Some("x:int"))),
                ("B", OpSpec::load("b", Some("y:int"))),
                (
                    "J",
                    OpSpec::join(
                        vec![
                            KeyedInput::new("A", vec![Expr::col("x")]),
                            KeyedInput::new("B", vec![Expr::col("y")]),
                        ],
                        JoinStrategy::Skewed,
                    ),
                ),
            ],
            &["J"],
        );
        let join = p.stage(p.outputs["J"]);
        assert_eq!(join.kind.name(), "skewed-join");
        assert_eq!(join.inputs.len(), 3);
        assert_eq!(p.stage(join.inputs[2]).kind.name(), "sample");
    }

    #[test]
    fn shared_input_is_not_folded() {
        let p = program(
            vec![
                ("A", OpSpec::load("a", Some("x:int"))),
                ("B", OpSpec::filter("A", Expr::binary(BinaryOp::Gt, Expr::col("x"), Expr::int(1)))),
                ("C", OpSpec::filter("A", Expr::lt(Expr::col("x"), Expr::int(0)))),
            ],
            &["B", "C"],
        );
        assert_eq!(kinds(&p), vec!["scan", "pipe", "pipe"]);
    }

    #[test]
    fn plan_hash_is_deterministic() {
        let rels = || {
            vec![
                ("A", OpSpec::load("a", Some("x:int"))),
                ("B", OpSpec::group("A", vec![Expr::col("x")])),
            ]
        };
        let a = program(rels(), &["B"]).plan_hash().unwrap();
        let b = program(rels(), &["B"]).plan_hash().unwrap();
        assert_eq!(a, b);
    }
}
