//! Range partitioning for a total order.
//!
//! Boundaries are quantiles of a seeded key sample. Bucket `i` only holds
//! keys strictly before every key of bucket `i + 1` in sort order (which is
//! reversed for descending keys), so concatenating sorted buckets yields a
//! globally sorted result. Equal keys always land in the same bucket.

use dagrel_core::value::{compare_rows, SortKey, Tuple, Value};

#[derive(Debug, Clone)]
pub struct RangePartitioner {
    /// Data columns forming the key, in key order.
    columns: Vec<usize>,
    /// Directions over the projected key tuple.
    local: Vec<SortKey>,
    boundaries: Vec<Tuple>,
}

impl RangePartitioner {
    /// `sample` holds one 1-tuple per sampled row: the key value, or a tuple
    /// of key values when there are several sort keys.
    pub fn from_sample(sample: &[Tuple], keys: &[SortKey], buckets: usize) -> Self {
        let columns: Vec<usize> = keys.iter().map(|k| k.column).collect();
        let local: Vec<SortKey> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| SortKey {
                column: i,
                descending: k.descending,
            })
            .collect();

        let mut points: Vec<Tuple> = sample
            .iter()
            .map(|t| match (keys.len(), t.get(0)) {
                (1, v) => Tuple::new(vec![v.clone()]),
                (_, Value::Tuple(inner)) => inner.clone(),
                (_, v) => Tuple::new(vec![v.clone()]),
            })
            .collect();
        points.sort_by(|a, b| compare_rows(a, b, &local));

        let buckets = buckets.max(1);
        let mut boundaries: Vec<Tuple> = Vec::with_capacity(buckets - 1);
        if !points.is_empty() {
            for i in 1..buckets {
                let b = points[(i * points.len() / buckets).min(points.len() - 1)].clone();
                let repeats = boundaries
                    .last()
                    .is_some_and(|last| compare_rows(last, &b, &local).is_eq());
                if !repeats {
                    boundaries.push(b);
                }
            }
        }
        tracing::debug!(buckets, boundaries = boundaries.len(), sampled = points.len(), "range partitioner");
        Self {
            columns,
            local,
            boundaries,
        }
    }

    pub fn boundaries(&self) -> &[Tuple] {
        &self.boundaries
    }

    /// Bucket of a data row: the number of boundaries sorting before its key.
    pub fn bucket(&self, row: &Tuple) -> usize {
        let key = row.project(&self.columns);
        self.boundaries
            .partition_point(|b| compare_rows(b, &key, &self.local).is_lt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(keys: &[i32]) -> Vec<Tuple> {
        keys.iter().map(|k| Tuple::new(vec![Value::Int(*k)])).collect()
    }

    fn row(k: i32) -> Tuple {
        Tuple::new(vec![Value::Chars("x".into()), Value::Int(k)])
    }

    #[test]
    fn ascending_buckets_are_ordered() {
        let p = RangePartitioner::from_sample(&sample(&[1, 2, 3, 4, 5, 6, 7, 8]), &[SortKey::asc(1)], 4);
        assert_eq!(p.boundaries().len(), 3);
        let buckets: Vec<usize> = (0..10).map(|k| p.bucket(&row(k))).collect();
        assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(buckets[0], 0);
        assert_eq!(buckets[9], 3);
    }

    #[test]
    fn descending_reverses_bucket_order() {
        let p = RangePartitioner::from_sample(&sample(&[1, 2, 3, 4]), &[SortKey::desc(1)], 2);
        assert!(p.bucket(&row(10)) < p.bucket(&row(0)));
    }

    #[test]
    fn empty_sample_uses_one_bucket() {
        let p = RangePartitioner::from_sample(&[], &[SortKey::asc(0)], 3);
        assert_eq!(p.bucket(&row(5)), 0);
    }

    #[test]
    fn duplicate_quantiles_collapse() {
        let p = RangePartitioner::from_sample(&sample(&[3, 3, 3, 3]), &[SortKey::asc(1)], 4);
        assert_eq!(p.boundaries().len(), 1);
        assert_eq!(p.bucket(&row(3)), 0);
        assert_eq!(p.bucket(&row(4)), 1);
    }
}
