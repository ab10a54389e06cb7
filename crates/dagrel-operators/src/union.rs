//! Union: concatenation of inputs, each optionally reshaped to the merged
//! schema by a per-input projection.

use dagrel_core::expr::Expr;
use dagrel_core::value::Tuple;

use crate::eval::eval;
use crate::traits::{EvalContext, Result};

/// Apply `projection` to every row of one union input.
pub fn project_input(projection: Option<&[Expr]>, rows: Vec<Tuple>, ctx: &EvalContext) -> Result<Vec<Tuple>> {
    let Some(exprs) = projection else {
        return Ok(rows);
    };
    rows.iter()
        .map(|row| {
            exprs
                .iter()
                .map(|e| eval(e, row, &[], ctx))
                .collect::<Result<Vec<_>>>()
                .map(Tuple::new)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagrel_core::codec::CasterKind;
    use dagrel_core::schema::DataType;
    use dagrel_core::value::Value;

    #[test]
    fn projection_casts_bytearray_columns() {
        let cast = Expr::Cast {
            expr: Box::new(Expr::pos(0)),
            to: dagrel_core::expr::TypeSpec(dagrel_core::schema::Field::unnamed(DataType::Int32)),
            caster: Some(CasterKind::Utf8),
        };
        let exprs = vec![cast, Expr::pos(1)];
        let rows = vec![Tuple::new(vec![Value::Bytes(b"3".to_vec()), Value::Int(1)])];
        let out = project_input(Some(&exprs), rows.clone(), &EvalContext::new()).unwrap();
        assert_eq!(out, vec![Tuple::new(vec![Value::Int(3), Value::Int(1)])]);
        assert_eq!(project_input(None, rows.clone(), &EvalContext::new()).unwrap(), rows);
    }
}
