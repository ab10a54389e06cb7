//! Two-input equi-joins.
//!
//! Every strategy reduces to joining the rows of one bucket: the hash join
//! probes a table built from the right side, the merge join sweeps two
//! key-sorted runs. Null keys never match. Outer joins pad the missing side
//! with nulls, using the side's schema width when it is known and the widest
//! row seen otherwise.

pub mod merge;
pub mod skewed;

use std::collections::{BTreeSet, HashMap};

use dagrel_core::dag::JoinType;
use dagrel_core::value::{Tuple, Value};

use crate::traits::{expect_inputs, is_null_key, EvalContext, Keyed, Operator, Result};

pub use merge::MergeJoin;
pub use skewed::SkewPlan;

fn keeps_left(t: JoinType) -> bool {
    matches!(t, JoinType::Left | JoinType::Full)
}

fn keeps_right(t: JoinType) -> bool {
    matches!(t, JoinType::Right | JoinType::Full)
}

/// Null padding for each side of one bucket.
#[derive(Debug, Clone)]
pub(crate) struct Padding {
    left: Tuple,
    right: Tuple,
}

impl Padding {
    pub(crate) fn new(widths: &[Option<usize>], left: &[Keyed], right: &[Keyed]) -> Self {
        let width = |side: usize, rows: &[Keyed]| {
            widths
                .get(side)
                .copied()
                .flatten()
                .unwrap_or_else(|| rows.iter().map(|k| k.row.len()).max().unwrap_or(0))
        };
        Self {
            left: Tuple::nulls(width(0, left)),
            right: Tuple::nulls(width(1, right)),
        }
    }

    pub(crate) fn left_only(&self, l: &Tuple) -> Tuple {
        l.concat(&self.right)
    }

    pub(crate) fn right_only(&self, r: &Tuple) -> Tuple {
        self.left.concat(r)
    }
}

/// Hash join of one bucket; also the probe side of replicated joins.
#[derive(Debug, Clone)]
pub struct HashJoin {
    pub join_type: JoinType,
    pub widths: Vec<Option<usize>>,
    /// Right rows with these keys are replicated across buckets and always
    /// find their match elsewhere; they are never padded here.
    pub replicated_keys: BTreeSet<Value>,
}

impl HashJoin {
    pub fn new(join_type: JoinType, widths: Vec<Option<usize>>) -> Self {
        Self {
            join_type,
            widths,
            replicated_keys: BTreeSet::new(),
        }
    }

    pub fn with_replicated_keys(mut self, keys: BTreeSet<Value>) -> Self {
        self.replicated_keys = keys;
        self
    }

    pub fn join(&self, left: Vec<Keyed>, right: &[Keyed]) -> Vec<Tuple> {
        let pad = Padding::new(&self.widths, &left, right);
        let mut table: HashMap<&Value, Vec<usize>> = HashMap::new();
        for (i, r) in right.iter().enumerate() {
            if !is_null_key(&r.key) {
                table.entry(&r.key).or_default().push(i);
            }
        }

        let mut matched = vec![false; right.len()];
        let mut out = Vec::new();
        for l in &left {
            let hits = if is_null_key(&l.key) {
                None
            } else {
                table.get(&l.key)
            };
            match hits {
                Some(hits) => {
                    for &i in hits {
                        matched[i] = true;
                        out.push(l.row.concat(&right[i].row));
                    }
                }
                None if keeps_left(self.join_type) => out.push(pad.left_only(&l.row)),
                None => {}
            }
        }

        if keeps_right(self.join_type) {
            for (i, r) in right.iter().enumerate() {
                if !matched[i] && !self.replicated_keys.contains(&r.key) {
                    out.push(pad.right_only(&r.row));
                }
            }
        }
        out
    }
}

impl Operator for HashJoin {
    fn name(&self) -> &'static str {
        "hash-join"
    }

    fn arity(&self) -> usize {
        2
    }

    fn eval_bucket(&self, inputs: Vec<Vec<Keyed>>, _ctx: &EvalContext) -> Result<Vec<Tuple>> {
        expect_inputs(self, &inputs)?;
        let mut it = inputs.into_iter();
        let left = it.next().unwrap_or_default();
        let right = it.next().unwrap_or_default();
        Ok(self.join(left, &right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn kv(key: Option<i32>, v: &str) -> Keyed {
        let key = key.map_or(Value::Null, Value::Int);
        Keyed::new(key.clone(), Tuple::new(vec![key, Value::Chars(v.into())]))
    }

    fn sides() -> Vec<Vec<Keyed>> {
        vec![
            vec![kv(Some(1), "a"), kv(Some(2), "b"), kv(None, "n")],
            vec![kv(Some(2), "x"), kv(Some(2), "y"), kv(Some(3), "z"), kv(None, "m")],
        ]
    }

    fn run(t: JoinType) -> Vec<Tuple> {
        HashJoin::new(t, vec![Some(2), Some(2)])
            .eval_bucket(sides(), &EvalContext::new())
            .unwrap()
    }

    #[test]
    fn inner_skips_null_keys() {
        let out = run(JoinType::Inner);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|t| t.get(0) == &Value::Int(2) && t.len() == 4));
    }

    #[test]
    fn left_and_right_outer_pad() {
        let left = run(JoinType::Left);
        assert_eq!(left.len(), 4);
        assert!(left.contains(&Tuple::new(vec![
            Value::Int(1),
            Value::Chars("a".into()),
            Value::Null,
            Value::Null
        ])));

        let right = run(JoinType::Right);
        assert_eq!(right.len(), 4);
        assert!(right.contains(&Tuple::new(vec![
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Chars("m".into())
        ])));
    }

    #[test]
    fn full_outer_keeps_both() {
        assert_eq!(run(JoinType::Full).len(), 6);
    }

    #[test]
    fn unknown_width_uses_widest_row() {
        let out = HashJoin::new(JoinType::Left, vec![None, None]).join(
            vec![kv(Some(9), "a")],
            &[kv(Some(1), "b")],
        );
        assert_eq!(out[0].len(), 4);
    }
}
