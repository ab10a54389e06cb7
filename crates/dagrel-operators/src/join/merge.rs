//! Merge join.
//!
//! Precondition: both inputs arrive ordered on the join key. Each side is
//! stably re-sorted by key first, which is a linear pass over sorted input,
//! then equal-key runs are swept in lockstep.

use std::cmp::Ordering;

use dagrel_core::dag::JoinType;
use dagrel_core::value::Tuple;

use super::{keeps_left, keeps_right, Padding};
use crate::traits::{expect_inputs, is_null_key, EvalContext, Keyed, Operator, Result};

#[derive(Debug, Clone)]
pub struct MergeJoin {
    pub join_type: JoinType,
    pub widths: Vec<Option<usize>>,
}

impl MergeJoin {
    pub fn new(join_type: JoinType, widths: Vec<Option<usize>>) -> Self {
        Self { join_type, widths }
    }

    pub fn join(&self, mut left: Vec<Keyed>, mut right: Vec<Keyed>) -> Vec<Tuple> {
        let pad = Padding::new(&self.widths, &left, &right);
        left.sort_by(|a, b| a.key.cmp(&b.key));
        right.sort_by(|a, b| a.key.cmp(&b.key));

        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            let (lk, rk) = (&left[i].key, &right[j].key);
            if is_null_key(lk) {
                if keeps_left(self.join_type) {
                    out.push(pad.left_only(&left[i].row));
                }
                i += 1;
                continue;
            }
            if is_null_key(rk) {
                if keeps_right(self.join_type) {
                    out.push(pad.right_only(&right[j].row));
                }
                j += 1;
                continue;
            }
            match lk.cmp(rk) {
                Ordering::Less => {
                    if keeps_left(self.join_type) {
                        out.push(pad.left_only(&left[i].row));
                    }
                    i += 1;
                }
                Ordering::Greater => {
                    if keeps_right(self.join_type) {
                        out.push(pad.right_only(&right[j].row));
                    }
                    j += 1;
                }
                Ordering::Equal => {
                    let l_end = run_end(&left, i);
                    let r_end = run_end(&right, j);
                    for l in &left[i..l_end] {
                        for r in &right[j..r_end] {
                            out.push(l.row.concat(&r.row));
                        }
                    }
                    i = l_end;
                    j = r_end;
                }
            }
        }
        if keeps_left(self.join_type) {
            out.extend(left[i..].iter().map(|l| pad.left_only(&l.row)));
        }
        if keeps_right(self.join_type) {
            out.extend(right[j..].iter().map(|r| pad.right_only(&r.row)));
        }
        out
    }
}

/// End of the run of rows sharing the key at `start`.
fn run_end(rows: &[Keyed], start: usize) -> usize {
    let key = &rows[start].key;
    start + rows[start..].iter().take_while(|r| &r.key == key).count()
}

impl Operator for MergeJoin {
    fn name(&self) -> &'static str {
        "merge-join"
    }

    fn arity(&self) -> usize {
        2
    }

    fn eval_bucket(&self, inputs: Vec<Vec<Keyed>>, _ctx: &EvalContext) -> Result<Vec<Tuple>> {
        expect_inputs(self, &inputs)?;
        let mut it = inputs.into_iter();
        let left = it.next().unwrap_or_default();
        let right = it.next().unwrap_or_default();
        Ok(self.join(left, right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::tests::kv;
    use crate::join::HashJoin;

    fn sorted(mut rows: Vec<Tuple>) -> Vec<Tuple> {
        rows.sort();
        rows
    }

    #[test]
    fn agrees_with_hash_join_for_every_type() {
        let left = vec![kv(Some(3), "c"), kv(Some(1), "a"), kv(Some(2), "b"), kv(None, "n"), kv(Some(2), "bb")];
        let right = vec![kv(Some(2), "x"), kv(Some(4), "w"), kv(Some(2), "y"), kv(None, "m")];
        for t in [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full] {
            let widths = vec![Some(2), Some(2)];
            let merged = MergeJoin::new(t, widths.clone()).join(left.clone(), right.clone());
            let hashed = HashJoin::new(t, widths).join(left.clone(), &right);
            assert_eq!(sorted(merged), sorted(hashed), "{t:?}");
        }
    }

    #[test]
    fn empty_side() {
        let out = MergeJoin::new(JoinType::Left, vec![Some(2), Some(2)])
            .join(vec![kv(Some(1), "a")], Vec::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 4);
    }
}
