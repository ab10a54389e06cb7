use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use dagrel_core::config::EngineConfig;
use dagrel_core::dag::{JoinType, KeyedInput, OpDag, OpSpec, OrderKey};
use dagrel_core::expr::Expr;
use dagrel_core::value::{SortKey, Tuple, Value};
use dagrel_exec::Engine;
use dagrel_io::MemoryStorage;
use dagrel_mem::Storage;
use dagrel_operators::join::HashJoin;
use dagrel_operators::package::Package;
use dagrel_operators::sort::ExternalSort;
use dagrel_operators::{EvalContext, Keyed, Operator};

fn rows(n: usize) -> Vec<Tuple> {
    (0..n)
        .map(|i| {
            Tuple::new(vec![
                Value::Int(((i * 7919) % n) as i32),
                Value::Chars(format!("group-{}", i % 16)),
            ])
        })
        .collect()
}

fn keyed(n: usize, groups: usize) -> Vec<Keyed> {
    rows(n)
        .into_iter()
        .enumerate()
        .map(|(i, r)| Keyed::new(Value::Int((i % groups) as i32), r))
        .collect()
}

fn bench_sort(c: &mut Criterion) {
    let input = rows(4096);
    let ctx = EvalContext::new();
    let full = ExternalSort::new(vec![SortKey::asc(0)], None, 1024);
    let top = ExternalSort::new(vec![SortKey::desc(0)], Some(10), 1024);
    c.bench_function("sort_4096", |b| b.iter(|| full.sort(input.clone(), &ctx)));
    c.bench_function("top_k_10_of_4096", |b| b.iter(|| top.sort(input.clone(), &ctx)));
}

fn bench_package(c: &mut Criterion) {
    let ctx = EvalContext::new();
    let package = Package::new(1, vec![None]);
    let input = keyed(4096, 64);
    c.bench_function("package_4096_rows_64_keys", |b| {
        b.iter(|| package.eval_bucket(vec![input.clone()], &ctx))
    });
}

fn bench_hash_join(c: &mut Criterion) {
    let join = HashJoin::new(JoinType::Left, vec![Some(2), Some(2)]);
    let left = keyed(4096, 512);
    let right = keyed(512, 512);
    c.bench_function("hash_join_4096x512", |b| b.iter(|| join.join(left.clone(), &right)));
}

fn bench_engine(c: &mut Criterion) {
    let store = Arc::new(MemoryStorage::new());
    let text: String = (0..2048).map(|i| format!("{}\t{}\n", i % 37, i)).collect();
    store.put_str("a", &text);

    let mut dag = OpDag::new();
    dag.push("A", OpSpec::load("a", Some("k:int, v:long")));
    dag.push("G", OpSpec::group("A", vec![Expr::col("k")]));
    dag.push(
        "B",
        OpSpec::join(
            vec![
                KeyedInput::new("A", vec![Expr::col("k")]),
                KeyedInput::new("G", vec![Expr::col("group")]),
            ],
            Default::default(),
        ),
    );
    dag.push("O", OpSpec::order("B", vec![OrderKey::desc("v")]));
    dag.push("L", OpSpec::limit("O", 20));

    let engine = match Engine::new(EngineConfig::default(), Arc::clone(&store) as Arc<dyn Storage>) {
        Ok(engine) => engine,
        Err(e) => panic!("bench engine: {e}"),
    };
    c.bench_function("engine_group_join_topk_2048", |b| b.iter(|| engine.collect(&dag, "L")));
}

criterion_group!(operators, bench_sort, bench_package, bench_hash_join);
criterion_group!(end_to_end, bench_engine);
criterion_main!(operators, end_to_end);
