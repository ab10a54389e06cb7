//! Moving rows between partitions and buckets.
//!
//! A stage's output is a list of partitions. Shuffling stages turn their
//! inputs into buckets: per bucket, one list of keyed rows per input.

use std::collections::BTreeMap;

use dagrel_core::expr::Expr;
use dagrel_core::value::{Tuple, Value};
use dagrel_operators::join::skewed::SkewPlan;
use dagrel_operators::sort::RangePartitioner;
use dagrel_operators::{eval_key, EvalContext, Keyed, Partitioner, Result};

pub type Partitions = Vec<Vec<Tuple>>;

/// Per bucket, per input, the rows routed there.
pub type Buckets = Vec<Vec<Vec<Keyed>>>;

pub fn row_count(parts: &[Vec<Tuple>]) -> u64 {
    parts.iter().map(|p| p.len() as u64).sum()
}

pub fn concat(parts: Partitions) -> Vec<Tuple> {
    parts.into_iter().flatten().collect()
}

/// `n` contiguous chunks of `rows`; concatenating them gives `rows` back.
pub fn split_even(rows: Vec<Tuple>, n: usize) -> Partitions {
    let n = n.max(1);
    let per = rows.len().div_ceil(n).max(1);
    let mut it = rows.into_iter();
    (0..n).map(|_| it.by_ref().take(per).collect()).collect()
}

/// Round-robin over `n` partitions.
pub fn deal(rows: Vec<Tuple>, n: usize) -> Partitions {
    let n = n.max(1);
    let mut parts: Partitions = vec![Vec::new(); n];
    for (i, row) in rows.into_iter().enumerate() {
        parts[i % n].push(row);
    }
    parts
}

pub fn empty_buckets(buckets: usize, inputs: usize) -> Buckets {
    (0..buckets.max(1)).map(|_| vec![Vec::new(); inputs]).collect()
}

/// Evaluate `keys` over every row of every partition.
pub fn keyed(parts: Partitions, keys: &[Expr], ctx: &EvalContext) -> Result<Vec<Keyed>> {
    parts
        .into_iter()
        .flatten()
        .map(|row| Ok(Keyed::new(eval_key(keys, &row, ctx)?, row)))
        .collect()
}

pub fn partition_by(buckets: &mut Buckets, input: usize, rows: Vec<Keyed>, partitioner: &dyn Partitioner) {
    let n = buckets.len();
    for k in rows {
        let b = partitioner.bucket(&k.key, n);
        buckets[b][input].push(k);
    }
}

/// Left rows of heavy keys spread round-robin; matching right rows go everywhere.
pub fn skew_route(plan: &SkewPlan, left: Vec<Keyed>, right: Vec<Keyed>) -> Buckets {
    let mut buckets = empty_buckets(plan.buckets(), 2);
    let mut seen: BTreeMap<Value, usize> = BTreeMap::new();
    for k in left {
        let seq = if plan.is_heavy(&k.key) {
            let n = seen.entry(k.key.clone()).or_default();
            *n += 1;
            *n - 1
        } else {
            0
        };
        let b = plan.route_left(&k.key, seq);
        buckets[b][0].push(k);
    }
    for k in right {
        let targets = plan.route_right(&k.key);
        if let Some((last, rest)) = targets.split_last() {
            for &b in rest {
                buckets[b][1].push(k.clone());
            }
            buckets[*last][1].push(k);
        }
    }
    buckets
}

/// Rows bucketed by key range; bucket order is sort order.
pub fn range_route(partitioner: &RangePartitioner, rows: Vec<Tuple>, n: usize) -> Partitions {
    let mut parts: Partitions = vec![Vec::new(); n.max(1)];
    let last = parts.len() - 1;
    for row in rows {
        let b = partitioner.bucket(&row).min(last);
        parts[b].push(row);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: i32) -> Vec<Tuple> {
        (0..n).map(|i| Tuple::new(vec![Value::Int(i)])).collect()
    }

    #[test]
    fn split_even_keeps_order() {
        let parts = split_even(rows(7), 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 3);
        assert_eq!(concat(parts), rows(7));
        assert_eq!(split_even(Vec::new(), 2).len(), 2);
    }

    #[test]
    fn deal_spreads_rows() {
        let parts = deal(rows(5), 2);
        assert_eq!(row_count(&parts), 5);
        assert_eq!(parts[0].len(), 3);
    }

    #[test]
    fn heavy_right_rows_reach_every_bucket() {
        let sample: Vec<Tuple> = (0..10).map(|_| Tuple::new(vec![Value::Int(1)])).collect();
        let plan = SkewPlan::from_sample(&sample, 0.5, 3);
        let left = (0..6).map(|i| Keyed::new(Value::Int(1), Tuple::new(vec![Value::Int(i)]))).collect();
        let right = vec![Keyed::new(Value::Int(1), Tuple::new(vec![Value::Int(100)]))];
        let buckets = skew_route(&plan, left, right);
        assert!(buckets.iter().all(|b| b[0].len() == 2 && b[1].len() == 1));
    }
}
