//! Global order across range partitions, limit and top-K.


use std::sync::Arc;

use dagrel_core::dag::{OpSpec, OrderKey};
use dagrel_core::value::Value;
use dagrel_io::MemoryStorage;
use test_support::{chars, config, dag, engine, ints, lines, row};

fn shuffled(n: i32) -> String {
    lines((0..n).map(|i| (i * 37) % n))
}

#[test]
fn test_order_ascending_across_partitions() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", &shuffled(101));
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("x:int"))),
        ("O", OpSpec::order("A", vec![OrderKey::asc("x")]).parallel(3)),
    ]);
    let rows = engine(&store, config(4)).collect(&d, "O").expect("order runs");
    let expected: Vec<i32> = (0..101).collect();
    assert_eq!(rows, ints(&expected));
}

#[test]
fn test_order_descending_across_partitions() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", &shuffled(50));
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("x:int"))),
        ("O", OpSpec::order("A", vec![OrderKey::desc("x")]).parallel(3)),
    ]);
    let rows = engine(&store, config(2)).collect(&d, "O").expect("order runs");
    let expected: Vec<i32> = (0..50).rev().collect();
    assert_eq!(rows, ints(&expected));
}

#[test]
fn test_order_on_two_keys() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", "b\t2\na\t9\nb\t1\na\t3\n");
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("s:chararray, n:int"))),
        (
            "O",
            OpSpec::order("A", vec![OrderKey::asc("s"), OrderKey::desc("n")]).parallel(2),
        ),
    ]);
    let rows = engine(&store, config(2)).collect(&d, "O").expect("order runs");
    assert_eq!(
        rows,
        vec![
            row(vec![chars("a"), Value::Int(9)]),
            row(vec![chars("a"), Value::Int(3)]),
            row(vec![chars("b"), Value::Int(2)]),
            row(vec![chars("b"), Value::Int(1)]),
        ]
    );
}

#[test]
fn test_order_then_limit_keeps_the_top_rows() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", &shuffled(40));
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("x:int"))),
        ("O", OpSpec::order("A", vec![OrderKey::desc("x")]).parallel(3)),
        ("L", OpSpec::limit("O", 4)),
    ]);
    let rows = engine(&store, config(3)).collect(&d, "L").expect("top-k runs");
    assert_eq!(rows, ints(&[39, 38, 37, 36]));
}

#[test]
fn test_order_of_empty_input() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", "");
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("x:int"))),
        ("O", OpSpec::order("A", vec![OrderKey::asc("x")]).parallel(2)),
        ("L", OpSpec::limit("O", 3)),
    ]);
    let rows = engine(&store, config(2)).collect(&d, "L").expect("empty order runs");
    assert!(rows.is_empty());
}

#[test]
fn test_limit_of_limit_takes_the_smaller() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", &lines(0..20));
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("x:int"))),
        ("L1", OpSpec::limit("A", 7)),
        ("L2", OpSpec::limit("L1", 3)),
    ]);
    let rows = engine(&store, config(3)).collect(&d, "L2").expect("limit runs");
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_limit_zero_is_empty() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", &lines(0..5));
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("x:int"))),
        ("L", OpSpec::limit("A", 0)),
    ]);
    assert!(engine(&store, config(2)).collect(&d, "L").expect("limit runs").is_empty());
}

#[test]
fn test_blank_lines_load_as_null_rows() {
    let store = Arc::new(MemoryStorage::new());
    store.put_str("a", "5\n\n3\n9\n\n1\n");
    let d = dag(vec![
        ("A", OpSpec::load("a", Some("x:int"))),
        ("O", OpSpec::order("A", vec![OrderKey::desc("x")]).parallel(2)),
    ]);
    let rows = engine(&store, config(2)).collect(&d, "O").expect("order runs");
    let mut expected = ints(&[9, 5, 3, 1]);
    expected.extend([row(vec![Value::Null]), row(vec![Value::Null])]);
    assert_eq!(rows, expected);
}
