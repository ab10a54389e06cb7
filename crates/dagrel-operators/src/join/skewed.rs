//! Skewed join routing.
//!
//! A seeded sample of left-side keys is taken first. Keys whose share of
//! the sample exceeds the threshold are heavy: their left rows are dealt
//! round-robin over every bucket and the matching right rows are copied to
//! all of them. Other keys hash to a single bucket as in a hash join. The
//! sample is computed once and only read afterwards.

use std::collections::{BTreeMap, BTreeSet};

use dagrel_core::value::{Tuple, Value};

use crate::partition::{HashPartitioner, Partitioner};
use crate::traits::is_null_key;

#[derive(Debug, Clone)]
pub struct SkewPlan {
    buckets: usize,
    /// Heavy key -> first bucket of its spread.
    heavy: BTreeMap<Value, usize>,
}

impl SkewPlan {
    /// `sample` holds one 1-tuple per sampled left row, carrying its join key.
    pub fn from_sample(sample: &[Tuple], threshold: f64, buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let mut counts: BTreeMap<&Value, usize> = BTreeMap::new();
        let mut total = 0usize;
        for t in sample {
            let key = t.get(0);
            if !is_null_key(key) {
                *counts.entry(key).or_default() += 1;
                total += 1;
            }
        }
        let heavy = counts
            .into_iter()
            .filter(|(_, n)| total > 0 && *n as f64 / total as f64 > threshold)
            .map(|(k, _)| (k.clone(), HashPartitioner.bucket(k, buckets)))
            .collect::<BTreeMap<_, _>>();
        if !heavy.is_empty() {
            tracing::debug!(heavy = heavy.len(), sampled = total, "skewed join heavy keys");
        }
        Self { buckets, heavy }
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn is_heavy(&self, key: &Value) -> bool {
        self.heavy.contains_key(key)
    }

    pub fn heavy_keys(&self) -> BTreeSet<Value> {
        self.heavy.keys().cloned().collect()
    }

    /// Bucket for the `seq`-th left row carrying `key`.
    pub fn route_left(&self, key: &Value, seq: usize) -> usize {
        match self.heavy.get(key) {
            Some(base) => (base + seq) % self.buckets,
            None => HashPartitioner.bucket(key, self.buckets),
        }
    }

    /// Buckets receiving a right row carrying `key`.
    pub fn route_right(&self, key: &Value) -> Vec<usize> {
        if self.is_heavy(key) {
            (0..self.buckets).collect()
        } else {
            vec![HashPartitioner.bucket(key, self.buckets)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::HashJoin;
    use crate::traits::Keyed;
    use dagrel_core::dag::JoinType;

    fn sample(keys: &[i32]) -> Vec<Tuple> {
        keys.iter().map(|k| Tuple::new(vec![Value::Int(*k)])).collect()
    }

    #[test]
    fn heavy_keys_follow_threshold() {
        let plan = SkewPlan::from_sample(&sample(&[1, 1, 1, 1, 2, 3]), 0.5, 3);
        assert!(plan.is_heavy(&Value::Int(1)));
        assert!(!plan.is_heavy(&Value::Int(2)));
        let spread: BTreeSet<usize> = (0..6).map(|s| plan.route_left(&Value::Int(1), s)).collect();
        assert_eq!(spread.len(), 3);
        assert_eq!(plan.route_right(&Value::Int(1)), vec![0, 1, 2]);
        assert_eq!(plan.route_right(&Value::Int(2)).len(), 1);
    }

    #[test]
    fn routed_right_outer_join_matches_single_bucket() {
        let plan = SkewPlan::from_sample(&sample(&[7, 7, 7]), 0.25, 4);
        let left: Vec<Keyed> = (0..2)
            .map(|i| Keyed::new(Value::Int(7), Tuple::new(vec![Value::Int(7), Value::Int(i)])))
            .collect();
        let right = vec![
            Keyed::new(Value::Int(7), Tuple::new(vec![Value::Int(7)])),
            Keyed::new(Value::Int(8), Tuple::new(vec![Value::Int(8)])),
        ];
        let op = HashJoin::new(JoinType::Right, vec![Some(2), Some(1)])
            .with_replicated_keys(plan.heavy_keys());

        let mut buckets: Vec<(Vec<Keyed>, Vec<Keyed>)> = vec![(Vec::new(), Vec::new()); 4];
        for (seq, l) in left.iter().enumerate() {
            buckets[plan.route_left(&l.key, seq)].0.push(l.clone());
        }
        for r in &right {
            for b in plan.route_right(&r.key) {
                buckets[b].1.push(r.clone());
            }
        }
        let mut out: Vec<Tuple> = buckets
            .into_iter()
            .flat_map(|(l, r)| op.join(l, &r))
            .collect();
        out.sort();
        let mut expected = HashJoin::new(JoinType::Right, vec![Some(2), Some(1)]).join(left, &right);
        expected.sort();
        assert_eq!(out, expected);
    }
}
