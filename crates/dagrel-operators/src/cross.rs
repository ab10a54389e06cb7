//! Cross product.
//!
//! Rows of the first input are dealt over buckets; every other input is
//! copied to all buckets, so each combination is produced exactly once.

use dagrel_core::value::Tuple;

use crate::traits::{expect_inputs, EvalContext, Keyed, Operator, Result};

#[derive(Debug, Clone)]
pub struct Cross {
    pub inputs: usize,
}

impl Cross {
    pub fn new(inputs: usize) -> Self {
        Self { inputs }
    }
}

impl Operator for Cross {
    fn name(&self) -> &'static str {
        "cross"
    }

    fn arity(&self) -> usize {
        self.inputs
    }

    fn eval_bucket(&self, inputs: Vec<Vec<Keyed>>, _ctx: &EvalContext) -> Result<Vec<Tuple>> {
        expect_inputs(self, &inputs)?;
        let mut acc: Vec<Tuple> = vec![Tuple::default()];
        for side in &inputs {
            let mut next = Vec::with_capacity(acc.len() * side.len());
            for prefix in &acc {
                for k in side {
                    next.push(prefix.concat(&k.row));
                }
            }
            acc = next;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagrel_core::value::Value;

    fn side(values: &[i32]) -> Vec<Keyed> {
        values
            .iter()
            .map(|v| Keyed::unkeyed(Tuple::new(vec![Value::Int(*v)])))
            .collect()
    }

    #[test]
    fn three_way_product() {
        let out = Cross::new(3)
            .eval_bucket(vec![side(&[1, 2]), side(&[3]), side(&[4, 5])], &EvalContext::new())
            .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Tuple::new(vec![Value::Int(1), Value::Int(3), Value::Int(4)]));
    }

    #[test]
    fn empty_side_empties_the_product() {
        let out = Cross::new(2)
            .eval_bucket(vec![side(&[1]), side(&[])], &EvalContext::new())
            .unwrap();
        assert!(out.is_empty());
    }
}
