//! Group bags and sorts that page to local spill storage.


use std::sync::Arc;

use dagrel_core::config::EngineConfig;
use dagrel_core::dag::{GenerateItem, OpSpec, OrderKey, StorageFormat};
use dagrel_core::expr::Expr;
use dagrel_core::value::Value;
use dagrel_exec::Engine;
use dagrel_io::FsStorage;
use dagrel_mem::Storage;
use tempfile::TempDir;
use test_support::{dag, ints, lines, row, sorted};

fn fs_engine(dir: &TempDir, codec: &str) -> Engine {
    let cfg = EngineConfig {
        default_parallelism: 2,
        bag_spill_rows: 4,
        mem_cap_bytes: 8 * 1024,
        spill_dir: dir.path().join("spill").display().to_string(),
        spill_codec: codec.to_string(),
        ..EngineConfig::default()
    };
    Engine::new(cfg, Arc::new(FsStorage::new()) as Arc<dyn Storage>).expect("engine config is valid")
}

fn write_input(dir: &TempDir, name: &str, text: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, text).expect("write input");
    path.display().to_string()
}

fn group_sums(codec: &str) {
    let dir = tempfile::tempdir().expect("tempdir");
    let text: String = (0..300).map(|i| format!("{}\t{i}\n", i % 3)).collect();
    let input = write_input(&dir, "a.txt", &text);
    let d = dag(vec![
        ("A", OpSpec::load(&input, Some("k:int, v:long"))),
        ("G", OpSpec::group("A", vec![Expr::col("k")])),
        (
            "S",
            OpSpec::foreach(
                "G",
                vec![
                    GenerateItem::expr(Expr::col("group")),
                    GenerateItem::expr(Expr::func("COUNT", vec![Expr::col("A")])),
                    GenerateItem::expr(Expr::func("SUM", vec![Expr::project(Expr::col("A"), &["v"])])),
                ],
            ),
        ),
    ]);
    let rows = fs_engine(&dir, codec).collect(&d, "S").expect("spilling group runs");
    let expected: Vec<_> = (0..3i64)
        .map(|k| {
            let sum: i64 = (0..300i64).filter(|i| i % 3 == k).sum();
            row(vec![Value::Int(k as i32), Value::Long(100), Value::Long(sum)])
        })
        .collect();
    assert_eq!(sorted(rows), expected);
}

#[test]
fn test_group_bags_spill_and_aggregate() {
    group_sums("none");
}

#[cfg(feature = "zstd")]
#[test]
fn test_group_bags_spill_with_zstd() {
    group_sums("zstd");
}

#[cfg(feature = "lz4")]
#[test]
fn test_group_bags_spill_with_lz4() {
    group_sums("lz4");
}

#[test]
fn test_sort_spills_runs_and_merges() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_input(&dir, "a.txt", &lines((0..500).map(|i| (i * 211) % 500)));
    let d = dag(vec![
        ("A", OpSpec::load(&input, Some("x:int"))),
        ("O", OpSpec::order("A", vec![OrderKey::asc("x")])),
    ]);
    let rows = fs_engine(&dir, "none").collect(&d, "O").expect("spilling sort runs");
    let expected: Vec<i32> = (0..500).collect();
    assert_eq!(rows, ints(&expected));
}

#[test]
fn test_store_to_local_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_input(&dir, "a.txt", "2\n1\n");
    let out = dir.path().join("out").display().to_string();
    let d = dag(vec![
        ("A", OpSpec::load(&input, Some("x:int"))),
        ("O", OpSpec::order("A", vec![OrderKey::asc("x")])),
        ("S", OpSpec::store("O", &out, StorageFormat::Text)),
    ]);
    let manifest = fs_engine(&dir, "none").run(&d).expect("store runs");
    assert!(manifest.finished_ms >= manifest.started_ms);
    assert_eq!(manifest.stages.last().map(|s| s.rows_out), Some(2));

    let mut parts: Vec<_> = std::fs::read_dir(&out)
        .expect("output directory exists")
        .map(|e| e.expect("dir entry").path())
        .collect();
    parts.sort();
    let text: String = parts
        .iter()
        .map(|p| std::fs::read_to_string(p).expect("part file"))
        .collect();
    assert_eq!(text, "1\n2\n");
}
