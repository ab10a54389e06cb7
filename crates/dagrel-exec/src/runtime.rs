//! Runtime: execute a PhysicalProgram stage by stage and emit a RunManifest.
//!
//! - Stages run in program order, which is topological.
//! - A stage's kind produces its partitions; its folded pipeline then runs
//!   over each partition.
//! - Scalar sources are materialized into the evaluation context as soon as
//!   their stage completes.
//! - Any failure is reported with the id and label of the stage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, info_span};

use dagrel_core::config::EngineConfig;
use dagrel_core::dag::{JoinType, OpDag};
use dagrel_core::hash::hash_rows;
use dagrel_core::id::StageId;
use dagrel_core::manifest::{RunManifest, StageReport};
use dagrel_core::value::{Tuple, Value};
use dagrel_core::Error;

use dagrel_mem::{Codec, MemoryBudgetImpl, SpillContext, SpillManager, Storage};

use dagrel_io::readers::DEFAULT_DELIMITER;
use dagrel_io::{write_relation, LoadSpec, RelationReader, StoreSpec};

use dagrel_operators::cross::Cross;
use dagrel_operators::join::merge::MergeJoin;
use dagrel_operators::join::skewed::SkewPlan;
use dagrel_operators::join::HashJoin;
use dagrel_operators::package::Package;
use dagrel_operators::partition::resolve;
use dagrel_operators::sample::reservoir;
use dagrel_operators::sort::{ExternalSort, RangePartitioner};
use dagrel_operators::union::project_input;
use dagrel_operators::{eval_key, run_pipeline, EvalContext, Keyed, Operator};

use dagrel_planner::{LogicalPlan, PhysicalProgram, Stage, StageKind};

use crate::error::ExecError;
use crate::shuffle::{
    concat, deal, empty_buckets, keyed, partition_by, range_route, row_count, skew_route, split_even, Partitions,
};

/// Key every row shares under `group all`.
const GROUP_ALL_KEY: &str = "all";

/// Engine owns the storage handle, memory budget and spill manager.
pub struct Engine {
    cfg: EngineConfig,
    storage: Arc<dyn Storage>,
    spill: SpillContext,
}

/// Outcome of one program run.
#[derive(Debug)]
pub struct Execution {
    pub manifest: RunManifest,
    outputs: BTreeMap<String, Vec<Tuple>>,
}

impl Execution {
    /// Rows of an observed relation, in partition order.
    pub fn rows(&self, name: &str) -> Option<&[Tuple]> {
        self.outputs.get(name).map(Vec::as_slice)
    }

    pub fn into_rows(mut self, name: &str) -> Option<Vec<Tuple>> {
        self.outputs.remove(name)
    }
}

impl Engine {
    pub fn new(cfg: EngineConfig, storage: Arc<dyn Storage>) -> Result<Self, ExecError> {
        cfg.validate()?;
        let codec = Codec::from_name(&cfg.spill_codec)?;
        let manager = SpillManager::new(Arc::clone(&storage), codec, cfg.spill_dir.clone());
        let spill = SpillContext {
            manager: Arc::new(manager),
            budget: MemoryBudgetImpl::new(cfg.mem_cap_bytes),
            page_rows: cfg.bag_spill_rows,
        };
        Ok(Self { cfg, storage, spill })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Highest number of budgeted bytes held at once so far.
    pub fn peak_memory(&self) -> usize {
        self.spill.budget.peak_bytes()
    }

    /// Build, optimize and compile `dag`; `targets` are observed besides the stores.
    pub fn compile(&self, dag: &OpDag, targets: &[&str]) -> Result<(LogicalPlan, PhysicalProgram), ExecError> {
        Ok(dagrel_planner::plan(dag, targets, &self.cfg)?)
    }

    /// Compile and run every store of `dag`.
    pub fn run(&self, dag: &OpDag) -> Result<RunManifest, ExecError> {
        let (_, program) = self.compile(dag, &[])?;
        Ok(self.execute(&program)?.manifest)
    }

    /// Compile and run `dag`, returning the rows of `alias`.
    pub fn collect(&self, dag: &OpDag, alias: &str) -> Result<Vec<Tuple>, ExecError> {
        let (logical, program) = self.compile(dag, &[alias])?;
        let name = logical
            .alias(alias)
            .map(|id| logical.node(id).name.clone())
            .ok_or_else(|| ExecError::UnknownOutput(alias.to_string()))?;
        self.execute(&program)?
            .into_rows(&name)
            .ok_or(ExecError::UnknownOutput(name))
    }

    /// Execute a compiled program.
    pub fn execute(&self, program: &PhysicalProgram) -> Result<Execution, ExecError> {
        check_partitioners(program)?;
        let plan_hash = program.plan_hash()?;
        let mut manifest = RunManifest::new(plan_hash, self.cfg.seed, now_millis());
        info!(stages = program.stages.len(), plan = %plan_hash.to_hex(), "run started");

        let mut pending = consumers(program);
        let mut results: Vec<Option<Partitions>> = vec![None; program.stages.len()];
        let mut stored: Vec<Tuple> = Vec::new();
        let mut ctx = EvalContext::new().with_spill(self.spill.clone());

        for stage in &program.stages {
            let span = info_span!("stage", id = stage.id.get(), kind = stage.kind.name(), label = %stage.label);
            let _enter = span.enter();

            let fail = |source: Error| ExecError::Stage {
                stage: stage.id,
                label: stage.label.clone(),
                source,
            };

            let mut inputs = Vec::with_capacity(stage.inputs.len());
            for &i in &stage.inputs {
                inputs.push(take_input(&mut results, &mut pending, i).map_err(fail)?);
            }
            let rows_in = match stage.kind {
                StageKind::Scan { .. } => 0,
                _ => inputs.iter().map(|p| row_count(p)).sum(),
            };

            let (read, parts) = self.run_stage(stage, inputs, &ctx).map_err(fail)?;
            let rows_in = rows_in + read;
            let parts = parts
                .into_iter()
                .map(|p| run_pipeline(&stage.pipeline, p, &ctx))
                .collect::<dagrel_operators::Result<Partitions>>()
                .map_err(|e| fail(e.into()))?;

            if let StageKind::Store { .. } = stage.kind {
                stored.extend(parts.iter().flatten().cloned());
            }
            for (name, _) in program.scalars.iter().filter(|(_, s)| **s == stage.id) {
                let row = scalar_row(name, &parts).map_err(fail)?;
                ctx.set_scalar(name, row);
            }

            let report = StageReport {
                stage: stage.id,
                label: stage.label.clone(),
                partitions: parts.len(),
                rows_in,
                rows_out: row_count(&parts),
            };
            debug!(rows_in = report.rows_in, rows_out = report.rows_out, partitions = report.partitions, "stage done");
            manifest.record(report);
            results[stage.id.index()] = Some(parts);
        }

        let mut outputs = BTreeMap::new();
        for (name, &id) in &program.outputs {
            if let Some(parts) = results.get(id.index()).and_then(Option::as_ref) {
                outputs.insert(name.clone(), parts.iter().flatten().cloned().collect());
            }
        }

        let has_store = program
            .stages
            .iter()
            .any(|s| matches!(s.kind, StageKind::Store { .. }));
        let outputs_digest = has_store.then(|| hash_rows(&stored));
        let manifest = manifest.finish(now_millis(), outputs_digest);
        info!(
            stages = manifest.stages.len(),
            elapsed_ms = manifest.finished_ms.saturating_sub(manifest.started_ms),
            "run finished"
        );
        Ok(Execution { manifest, outputs })
    }

    /// Rows a stage's kind produces, plus rows it read from storage.
    fn run_stage(
        &self,
        stage: &Stage,
        mut inputs: Vec<Partitions>,
        ctx: &EvalContext,
    ) -> Result<(u64, Partitions), Error> {
        let parts = match &stage.kind {
            StageKind::Scan {
                location,
                format,
                delimiter,
                schema,
                caster,
            } => {
                let spec = LoadSpec {
                    location: location.clone(),
                    format: *format,
                    delimiter: delimiter.unwrap_or(DEFAULT_DELIMITER),
                    schema: schema.clone(),
                    caster: *caster,
                };
                let mut reader = RelationReader::open(self.storage.as_ref(), &spec)?;
                let files = reader.remaining();
                let mut rows = Vec::new();
                while let Some(batch) = reader.next_batch()? {
                    rows.extend(batch);
                }
                debug!(location = %location, files, rows = rows.len(), "loaded");
                let read = rows.len() as u64;
                return Ok((read, split_even(rows, self.cfg.default_parallelism)));
            }
            StageKind::Pipe => single(inputs)?,
            StageKind::Group {
                keys,
                all,
                partitioner,
                parallelism,
                per_key_limits,
            } => {
                let partitioner = resolve(partitioner.as_deref())?;
                let n = if *all { 1 } else { *parallelism };
                let arity = inputs.len();
                let mut buckets = empty_buckets(n, arity);
                for (i, parts) in inputs.into_iter().enumerate() {
                    let rows = if *all {
                        parts
                            .into_iter()
                            .flatten()
                            .map(|row| Keyed::new(Value::Chars(GROUP_ALL_KEY.into()), row))
                            .collect()
                    } else {
                        keyed(parts, key_exprs(keys, i)?, ctx)?
                    };
                    partition_by(&mut buckets, i, rows, partitioner.as_ref());
                }
                let op = Package::new(arity, per_key_limits.clone());
                eval_buckets(&op, buckets, ctx)?
            }
            StageKind::HashJoin {
                keys,
                join_type,
                partitioner,
                parallelism,
                widths,
            } => {
                let partitioner = resolve(partitioner.as_deref())?;
                let (left, right) = two(inputs)?;
                let mut buckets = empty_buckets(*parallelism, 2);
                partition_by(&mut buckets, 0, keyed(left, key_exprs(keys, 0)?, ctx)?, partitioner.as_ref());
                partition_by(&mut buckets, 1, keyed(right, key_exprs(keys, 1)?, ctx)?, partitioner.as_ref());
                eval_buckets(&HashJoin::new(*join_type, widths.clone()), buckets, ctx)?
            }
            StageKind::SkewedJoin {
                keys,
                join_type,
                parallelism,
                threshold,
                widths,
            } => {
                let sample = concat(inputs.pop().ok_or_else(|| arity_error(stage, 3))?);
                let (left, right) = two(inputs)?;
                let skew = SkewPlan::from_sample(&sample, *threshold, *parallelism);
                let buckets = skew_route(
                    &skew,
                    keyed(left, key_exprs(keys, 0)?, ctx)?,
                    keyed(right, key_exprs(keys, 1)?, ctx)?,
                );
                let op = HashJoin::new(*join_type, widths.clone()).with_replicated_keys(skew.heavy_keys());
                eval_buckets(&op, buckets, ctx)?
            }
            StageKind::MergeJoin {
                keys,
                join_type,
                widths,
            } => {
                let (left, right) = two(inputs)?;
                let rows = MergeJoin::new(*join_type, widths.clone()).eval_bucket(
                    vec![keyed(left, key_exprs(keys, 0)?, ctx)?, keyed(right, key_exprs(keys, 1)?, ctx)?],
                    ctx,
                )?;
                vec![rows]
            }
            StageKind::ReplicatedJoin {
                keys,
                join_type,
                widths,
            } => {
                let (left, right) = two(inputs)?;
                let right = keyed(right, key_exprs(keys, 1)?, ctx)?;
                // Unmatched right rows may only be emitted once.
                let left = match join_type {
                    JoinType::Right | JoinType::Full => vec![concat(left)],
                    JoinType::Inner | JoinType::Left => left,
                };
                let op = HashJoin::new(*join_type, widths.clone());
                let mut out = Vec::with_capacity(left.len());
                for part in left {
                    out.push(op.join(keyed(vec![part], key_exprs(keys, 0)?, ctx)?, &right));
                }
                out
            }
            StageKind::Cross {
                partitioner,
                parallelism,
            } => {
                let arity = inputs.len();
                let mut sides = inputs.into_iter();
                let first = sides.next().map(concat).unwrap_or_default();
                let rest: Vec<Vec<Keyed>> = sides
                    .map(|p| concat(p).into_iter().map(Keyed::unkeyed).collect())
                    .collect();
                let mut buckets = empty_buckets(*parallelism, arity);
                match partitioner {
                    // A named partitioner sees each first-input row as its key.
                    Some(name) => {
                        let partitioner = resolve(Some(name.as_str()))?;
                        let rows = first
                            .into_iter()
                            .map(|row| Keyed::new(Value::Tuple(row.clone()), row))
                            .collect();
                        partition_by(&mut buckets, 0, rows, partitioner.as_ref());
                    }
                    None => {
                        for (bucket, part) in buckets.iter_mut().zip(deal(first, *parallelism)) {
                            if let Some(slot) = bucket.first_mut() {
                                *slot = part.into_iter().map(Keyed::unkeyed).collect();
                            }
                        }
                    }
                }
                for bucket in &mut buckets {
                    for (side, rows) in bucket.iter_mut().skip(1).zip(&rest) {
                        side.clone_from(rows);
                    }
                }
                eval_buckets(&Cross::new(arity), buckets, ctx)?
            }
            StageKind::Sample { keys, size, seed } => {
                let values = concat(single(inputs)?)
                    .iter()
                    .map(|row| eval_key(keys, row, ctx))
                    .collect::<dagrel_operators::Result<Vec<Value>>>()?;
                vec![reservoir(values, *size, *seed)]
            }
            StageKind::Order {
                keys,
                parallelism,
                limit,
            } => {
                let (data, sample) = two(inputs)?;
                let ranges = RangePartitioner::from_sample(&concat(sample), keys, *parallelism);
                let sorter = ExternalSort::new(keys.clone(), *limit, self.cfg.bag_spill_rows);
                range_route(&ranges, concat(data), *parallelism)
                    .into_iter()
                    .map(|bucket| sorter.sort(bucket, ctx))
                    .collect::<dagrel_operators::Result<Partitions>>()?
            }
            StageKind::Limit { count } => {
                let mut rows = concat(single(inputs)?);
                rows.truncate(usize::try_from(*count).unwrap_or(usize::MAX));
                vec![rows]
            }
            StageKind::Union { projections } => {
                let mut out = Vec::new();
                for (i, parts) in inputs.into_iter().enumerate() {
                    let projection = projections.get(i).and_then(|p| p.as_deref());
                    for part in parts {
                        out.push(project_input(projection, part, ctx)?);
                    }
                }
                out
            }
            StageKind::Store {
                location,
                format,
                delimiter,
                reduce_side,
            } => {
                let parts = single(inputs)?;
                let side = if *reduce_side { 'r' } else { 'm' };
                let dir = location.trim_end_matches('/');
                for (i, part) in parts.iter().enumerate() {
                    let spec = StoreSpec {
                        location: format!("{dir}/part-{side}-{i:05}"),
                        format: *format,
                        delimiter: delimiter.unwrap_or(DEFAULT_DELIMITER),
                    };
                    write_relation(self.storage.as_ref(), &spec, part)?;
                }
                debug!(location = %location, parts = parts.len(), rows = row_count(&parts), "stored");
                parts
            }
        };
        Ok((0, parts))
    }
}

fn eval_buckets(op: &dyn Operator, buckets: Vec<Vec<Vec<Keyed>>>, ctx: &EvalContext) -> Result<Partitions, Error> {
    buckets
        .into_iter()
        .map(|b| op.eval_bucket(b, ctx).map_err(Error::from))
        .collect()
}

fn key_exprs(keys: &[Vec<dagrel_core::expr::Expr>], input: usize) -> Result<&[dagrel_core::expr::Expr], Error> {
    keys.get(input)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::Invariant(format!("no key expressions for input {input}")))
}

fn arity_error(stage: &Stage, expected: usize) -> Error {
    Error::Invariant(format!(
        "{} stage expects {expected} input(s), got {}",
        stage.kind.name(),
        stage.inputs.len()
    ))
}

fn single(inputs: Vec<Partitions>) -> Result<Partitions, Error> {
    let got = inputs.len();
    let mut it = inputs.into_iter();
    match (it.next(), it.next()) {
        (Some(p), None) => Ok(p),
        _ => Err(Error::Invariant(format!("expected 1 input, got {got}"))),
    }
}

fn two(inputs: Vec<Partitions>) -> Result<(Partitions, Partitions), Error> {
    let got = inputs.len();
    let mut it = inputs.into_iter();
    match (it.next(), it.next(), it.next()) {
        (Some(a), Some(b), None) => Ok((a, b)),
        _ => Err(Error::Invariant(format!("expected 2 inputs, got {got}"))),
    }
}

/// Every named partitioner must be registered before any data is read.
fn check_partitioners(program: &PhysicalProgram) -> Result<(), Error> {
    for stage in &program.stages {
        let name = match &stage.kind {
            StageKind::Group { partitioner, .. }
            | StageKind::HashJoin { partitioner, .. }
            | StageKind::Cross { partitioner, .. } => partitioner.as_deref(),
            _ => None,
        };
        if let Some(name) = name {
            dagrel_operators::partitioner(name).map_err(|e| Error::Plan(format!("{e} in stage [{}]", stage.label)))?;
        }
    }
    Ok(())
}

/// How many times each stage's output is still needed.
fn consumers(program: &PhysicalProgram) -> Vec<usize> {
    let mut n = vec![0usize; program.stages.len()];
    for stage in &program.stages {
        for i in &stage.inputs {
            n[i.index()] += 1;
        }
    }
    for id in program.outputs.values() {
        n[id.index()] += 1;
    }
    n
}

/// Input partitions for one consumer; the last consumer takes ownership.
fn take_input(results: &mut [Option<Partitions>], pending: &mut [usize], id: StageId) -> Result<Partitions, Error> {
    let i = id.index();
    let missing = || Error::Invariant(format!("stage #{} consumed before it ran", id.get()));
    let left = pending.get_mut(i).ok_or_else(missing)?;
    *left = left.saturating_sub(1);
    if *left == 0 {
        results.get_mut(i).and_then(Option::take).ok_or_else(missing)
    } else {
        results.get(i).and_then(Option::clone).ok_or_else(missing)
    }
}

/// The single row a scalar relation must have; none reads as null.
fn scalar_row(name: &str, parts: &[Vec<Tuple>]) -> Result<Option<Tuple>, Error> {
    let mut rows = parts.iter().flatten();
    let first = rows.next().cloned();
    if rows.next().is_some() {
        return Err(Error::Eval(format!(
            "scalar relation '{name}' has more than one row"
        )));
    }
    Ok(first)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagrel_core::dag::{GenerateItem, KeyedInput, OrderKey, OpSpec, StorageFormat};
    use dagrel_core::expr::Expr;
    use dagrel_io::MemoryStorage;

    fn engine(store: &Arc<MemoryStorage>) -> Engine {
        let cfg = EngineConfig {
            bag_spill_rows: 4,
            ..EngineConfig::default()
        };
        Engine::new(cfg, Arc::clone(store) as Arc<dyn Storage>).unwrap()
    }

    fn ints(vals: &[i32]) -> Vec<Tuple> {
        vals.iter().map(|v| Tuple::new(vec![Value::Int(*v)])).collect()
    }

    #[test]
    fn order_then_limit_is_sorted_and_capped() {
        let store = Arc::new(MemoryStorage::new());
        store.put_str("nums", "5\n3\n9\n1\n7\n2\n");
        let mut dag = OpDag::new();
        dag.push("A", OpSpec::load("nums", Some("x:int")));
        dag.push("B", OpSpec::order("A", vec![OrderKey::desc("x")]).parallel(3));
        dag.push("C", OpSpec::limit("B", 3));
        let rows = engine(&store).collect(&dag, "C").unwrap();
        assert_eq!(rows, ints(&[9, 7, 5]));
    }

    #[test]
    fn store_writes_part_files_and_digest() {
        let store = Arc::new(MemoryStorage::new());
        store.put_str("in", "1\n2\n");
        let mut dag = OpDag::new();
        dag.push("A", OpSpec::load("in", Some("x:int")));
        dag.push("S", OpSpec::store("A", "out", StorageFormat::Text));
        let manifest = engine(&store).run(&dag).unwrap();
        assert!(store.contains("out/part-m-00000"));
        assert!(manifest.outputs_digest.is_some());
        assert_eq!(manifest.stages.len(), 2);
        assert_eq!(manifest.stages[0].rows_in, 2);
    }

    #[test]
    fn cogroup_empty_side_counts_zero() {
        let store = Arc::new(MemoryStorage::new());
        store.put_str("a", "1\n2\n");
        store.put_str("b", "2\n");
        let mut dag = OpDag::new();
        dag.push("A", OpSpec::load("a", Some("x:int")));
        dag.push("B", OpSpec::load("b", Some("y:int")));
        dag.push(
            "G",
            OpSpec::cogroup(vec![KeyedInput::new("A", vec![Expr::col("x")]), KeyedInput::new("B", vec![Expr::col("y")])]),
        );
        dag.push(
            "C",
            OpSpec::foreach(
                "G",
                vec![
                    GenerateItem::expr(Expr::col("group")),
                    GenerateItem::expr(Expr::func("COUNT", vec![Expr::col("B")])),
                ],
            ),
        );
        let mut rows = engine(&store).collect(&dag, "C").unwrap();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                Tuple::new(vec![Value::Int(1), Value::Long(0)]),
                Tuple::new(vec![Value::Int(2), Value::Long(1)]),
            ]
        );
    }

    #[test]
    fn manifest_serializes_with_plan_hash() {
        let store = Arc::new(MemoryStorage::new());
        store.put_str("in", "1\n");
        let mut dag = OpDag::new();
        dag.push("A", OpSpec::load("in", Some("x:int")));
        dag.push("S", OpSpec::store("A", "out", StorageFormat::Bin));
        let manifest = engine(&store).run(&dag).unwrap();
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["plan_hash"], serde_json::json!(manifest.plan_hash));
        assert_eq!(json["stages"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn missing_input_names_the_failing_stage() {
        let store = Arc::new(MemoryStorage::new());
        let mut dag = OpDag::new();
        dag.push("A", OpSpec::load("nowhere", Some("x:int")));
        let err = engine(&store).collect(&dag, "A").unwrap_err();
        assert_eq!(err.stage(), Some(StageId::new(0)));
        assert!(err.to_string().contains("stage #0"));
    }

    #[test]
    fn scalar_with_many_rows_is_an_error() {
        let parts = vec![ints(&[1]), ints(&[2])];
        assert!(scalar_row("s", &parts).is_err());
        assert_eq!(scalar_row("s", &[Vec::new()]).unwrap(), None);
    }
}
