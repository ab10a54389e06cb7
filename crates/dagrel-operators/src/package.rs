//! Package: the reduce side of group and cogroup.
//!
//! Rows of one bucket are collected per key into one bag per input, built
//! through [`BagBuilder`] so large groups page out to spill storage. An input
//! with no rows for a key contributes an empty bag, never a null.
//!
//! For a single-input group, null keys form one group. For cogroup, null
//! keys never match across inputs, so each input's null-keyed rows form a
//! group of their own.

use std::collections::BTreeMap;

use dagrel_core::value::{Tuple, Value};
use dagrel_mem::BagBuilder;

use crate::traits::{expect_inputs, is_null_key, EvalContext, Keyed, Operator, Result};

#[derive(Debug, Clone)]
pub struct Package {
    inputs: usize,
    /// Per input, the most rows any consumer reads from its bag.
    per_key_limits: Vec<Option<u64>>,
}

impl Package {
    pub fn new(inputs: usize, per_key_limits: Vec<Option<u64>>) -> Self {
        Self {
            inputs,
            per_key_limits,
        }
    }

    fn limit(&self, input: usize) -> usize {
        self.per_key_limits
            .get(input)
            .copied()
            .flatten()
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX))
    }

    fn builders(&self, ctx: &EvalContext) -> Vec<BagBuilder> {
        (0..self.inputs)
            .map(|_| BagBuilder::new(ctx.spill().cloned()))
            .collect()
    }

    fn emit(key: Value, builders: Vec<BagBuilder>) -> Tuple {
        let mut values = Vec::with_capacity(builders.len() + 1);
        values.push(key);
        values.extend(builders.into_iter().map(|b| Value::Bag(b.finish())));
        Tuple::new(values)
    }
}

impl Operator for Package {
    fn name(&self) -> &'static str {
        "package"
    }

    fn arity(&self) -> usize {
        self.inputs
    }

    fn eval_bucket(&self, inputs: Vec<Vec<Keyed>>, ctx: &EvalContext) -> Result<Vec<Tuple>> {
        expect_inputs(self, &inputs)?;
        let cogroup = self.inputs > 1;
        let mut groups: BTreeMap<Value, Vec<BagBuilder>> = BTreeMap::new();
        let mut null_groups: Vec<Option<Vec<BagBuilder>>> = (0..self.inputs).map(|_| None).collect();

        for (i, rows) in inputs.into_iter().enumerate() {
            let limit = self.limit(i);
            for Keyed { key, row } in rows {
                let builders = if cogroup && is_null_key(&key) {
                    null_groups[i].get_or_insert_with(|| self.builders(ctx))
                } else {
                    groups.entry(key).or_insert_with(|| self.builders(ctx))
                };
                if builders[i].len() < limit {
                    builders[i].push(row)?;
                }
            }
        }

        let mut out = Vec::with_capacity(groups.len());
        for builders in null_groups.into_iter().flatten() {
            out.push(Self::emit(Value::Null, builders));
        }
        for (key, builders) in groups {
            out.push(Self::emit(key, builders));
        }
        tracing::trace!(groups = out.len(), "packaged bucket");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dagrel_io::MemoryStorage;
    use dagrel_mem::{Codec, MemoryBudgetImpl, SpillContext, SpillManager};

    fn k(key: Value, v: i32) -> Keyed {
        Keyed::new(key, Tuple::new(vec![Value::Int(v)]))
    }

    fn bag_len(v: &Value) -> usize {
        v.as_bag().map_or(usize::MAX, |b| b.len())
    }

    #[test]
    fn cogroup_missing_side_is_empty_bag() {
        let op = Package::new(2, vec![None, None]);
        let out = op
            .eval_bucket(
                vec![
                    vec![k(Value::Int(1), 10), k(Value::Int(2), 20)],
                    vec![k(Value::Int(2), 21)],
                ],
                &EvalContext::new(),
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get(0), &Value::Int(1));
        assert_eq!(bag_len(out[0].get(1)), 1);
        assert_eq!(bag_len(out[0].get(2)), 0);
        assert_eq!(bag_len(out[1].get(2)), 1);
    }

    #[test]
    fn cogroup_null_keys_stay_apart() {
        let op = Package::new(2, vec![None, None]);
        let out = op
            .eval_bucket(
                vec![vec![k(Value::Null, 1)], vec![k(Value::Null, 2)]],
                &EvalContext::new(),
            )
            .unwrap();
        assert_eq!(out.len(), 2);

        let single = Package::new(1, vec![None]);
        let out = single
            .eval_bucket(vec![vec![k(Value::Null, 1), k(Value::Null, 2)]], &EvalContext::new())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(bag_len(out[0].get(1)), 2);
    }

    #[test]
    fn per_key_limit_caps_bags() {
        let op = Package::new(1, vec![Some(2)]);
        let rows = (0..5).map(|i| k(Value::Int(1), i)).collect();
        let out = op.eval_bucket(vec![rows], &EvalContext::new()).unwrap();
        assert_eq!(bag_len(out[0].get(1)), 2);
    }

    #[test]
    fn large_groups_spill_and_stay_readable() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = EvalContext::new().with_spill(SpillContext {
            manager: Arc::new(SpillManager::new(storage, Codec::None, "spill")),
            budget: MemoryBudgetImpl::new(1 << 20),
            page_rows: 3,
        });
        let op = Package::new(1, vec![None]);
        let rows = (0..10).map(|i| k(Value::Int(0), i)).collect();
        let out = op.eval_bucket(vec![rows], &ctx).unwrap();
        let bag = out[0].get(1).as_bag().unwrap();
        assert!(bag.is_paged());
        assert_eq!(bag.to_vec().unwrap().len(), 10);
        assert_eq!(bag.to_vec().unwrap(), bag.to_vec().unwrap());
    }
}
