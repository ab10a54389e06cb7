//! Operator trait + common interfaces.
//!
//! The engine evaluates shuffle stages one bucket at a time: every input of
//! the stage is routed to buckets as [`Keyed`] rows, and the stage operator
//! turns the rows of one bucket into output tuples. Operators are pure
//! functions of their bucket, so re-running a bucket is always safe.

use std::collections::BTreeMap;

use dagrel_core::value::{Tuple, Value};
use dagrel_mem::SpillContext;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpError>;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("unknown partitioner '{0}'")]
    UnknownPartitioner(String),

    #[error("operator '{op}' expects {expected} input(s), got {got}")]
    Inputs {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Core(#[from] dagrel_core::Error),

    #[error(transparent)]
    Mem(#[from] dagrel_mem::Error),
}

impl From<OpError> for dagrel_core::Error {
    fn from(e: OpError) -> Self {
        match e {
            OpError::Core(inner) => inner,
            OpError::Mem(inner) => inner.into(),
            OpError::Eval(msg) => dagrel_core::Error::Eval(msg),
            other => dagrel_core::Error::Invariant(other.to_string()),
        }
    }
}

/// A row routed through a shuffle together with its evaluated key.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed {
    pub key: Value,
    pub row: Tuple,
}

impl Keyed {
    pub fn new(key: Value, row: Tuple) -> Self {
        Self { key, row }
    }

    /// Row with no key (cross, union, scans).
    pub fn unkeyed(row: Tuple) -> Self {
        Self::new(Value::Null, row)
    }
}

/// Keys that never compare equal to anything: null, or a tuple holding a null.
pub fn is_null_key(key: &Value) -> bool {
    match key {
        Value::Null => true,
        Value::Tuple(t) => t.values().iter().any(Value::is_null),
        _ => false,
    }
}

/// Read-only state shared by every partition of one run.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// Materialized one-row relations; `None` when the relation was empty.
    scalars: BTreeMap<String, Option<Tuple>>,
    spill: Option<SpillContext>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spill(mut self, spill: SpillContext) -> Self {
        self.spill = Some(spill);
        self
    }

    pub fn spill(&self) -> Option<&SpillContext> {
        self.spill.as_ref()
    }

    pub fn set_scalar(&mut self, relation: &str, row: Option<Tuple>) {
        self.scalars.insert(relation.to_string(), row);
    }

    /// Column `column` of scalar relation `relation`.
    pub fn scalar(&self, relation: &str, column: usize) -> Result<Value> {
        match self.scalars.get(relation) {
            Some(Some(row)) => Ok(row.get(column).clone()),
            Some(None) => Ok(Value::Null),
            None => Err(OpError::Eval(format!(
                "scalar relation '{relation}' used before it was materialized"
            ))),
        }
    }
}

/// Trait that all bucket-level operators implement.
///
/// Invariants:
/// - Buffers that grow with the input go through the spill context of `ctx`
///   when one is present.
/// - `eval_bucket` is deterministic given the same inputs.
pub trait Operator: Send + Sync {
    /// Human-readable operator name (stable).
    fn name(&self) -> &'static str;

    /// Number of inputs routed into each bucket.
    fn arity(&self) -> usize;

    /// Evaluate one bucket; `inputs[i]` holds the rows routed from input `i`.
    fn eval_bucket(&self, inputs: Vec<Vec<Keyed>>, ctx: &EvalContext) -> Result<Vec<Tuple>>;
}

/// Check the bucket shape before evaluating it.
pub fn expect_inputs(op: &dyn Operator, inputs: &[Vec<Keyed>]) -> Result<()> {
    if inputs.len() == op.arity() {
        Ok(())
    } else {
        Err(OpError::Inputs {
            op: op.name(),
            expected: op.arity(),
            got: inputs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_keys() {
        assert!(is_null_key(&Value::Null));
        assert!(is_null_key(&Value::Tuple(Tuple::new(vec![Value::Int(1), Value::Null]))));
        assert!(!is_null_key(&Value::Int(0)));
    }

    #[test]
    fn missing_scalar_is_an_error_but_empty_is_null() {
        let mut ctx = EvalContext::new();
        assert!(ctx.scalar("s", 0).is_err());
        ctx.set_scalar("s", None);
        assert_eq!(ctx.scalar("s", 0).unwrap(), Value::Null);
        ctx.set_scalar("s", Some(Tuple::new(vec![Value::Int(4)])));
        assert_eq!(ctx.scalar("s", 0).unwrap(), Value::Int(4));
    }
}
