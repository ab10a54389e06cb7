//! Operator DAG to logical plan.
//!
//! Relations are bound in definition order. Each one resolves its inputs by
//! alias, binds its expressions against the input schemas and is added to
//! the arena; its output schema is then derived from what was bound.

use dagrel_core::codec::CasterKind;
use dagrel_core::dag::{GenerateItem, KeyedInput, NestedOp, NestedStmt, OpDag, OpSpec, OrderKey};
use dagrel_core::error::{Error, Result};
use dagrel_core::expr::{ColumnRef, Expr};
use dagrel_core::id::NodeId;
use dagrel_core::plan::{FieldCast, GenItem, InnerOp, InnerPlan, InnerStmt};
use dagrel_core::schema::{DataType, Field, Schema};
use dagrel_core::value::SortKey;
use tracing::debug;

use crate::binder::{resolve_name, unify, Bound, Local, Scope};
use crate::lineage::{ColumnLineage, NodeLineage};
use crate::logical::{merge_all, LogicalOp, LogicalPlan};

/// Bind every relation of `dag`; `targets` are aliases whose output is
/// requested in addition to the stores.
pub fn build(dag: &OpDag, targets: &[&str]) -> Result<LogicalPlan> {
    let mut plan = LogicalPlan::default();
    for rel in &dag.relations {
        let (op, inputs) = bind_relation(&plan, &rel.alias, &rel.op)?;
        let is_store = matches!(op, LogicalOp::Store { .. });
        let id = plan.add(&rel.alias, op, inputs)?;
        if is_store {
            plan.add_output(id);
        }
        debug!(alias = %rel.alias, kind = rel.op.kind(), node = %id, "bound relation");
    }
    for t in targets {
        let id = plan
            .alias(t)
            .ok_or_else(|| Error::Plan(format!("undefined alias '{t}'")))?;
        plan.add_output(id);
    }
    Ok(plan)
}

fn input(plan: &LogicalPlan, alias: &str) -> Result<NodeId> {
    plan.alias(alias)
        .ok_or_else(|| Error::Plan(format!("undefined alias '{alias}'")))
}

fn scope(plan: &LogicalPlan, id: NodeId) -> Scope<'_> {
    Scope::new(plan, plan.schema(id), plan.lineage(id))
}

fn bind_relation(plan: &LogicalPlan, alias: &str, spec: &OpSpec) -> Result<(LogicalOp, Vec<NodeId>)> {
    let bound = match spec {
        OpSpec::Load {
            location,
            format,
            schema,
            caster,
            delimiter,
        } => {
            let declared = schema.as_deref().map(str::parse::<Schema>).transpose()?;
            let op = LogicalOp::Load {
                location: location.clone(),
                format: *format,
                delimiter: *delimiter,
                declared,
                caster: caster.unwrap_or_else(|| format.default_caster()),
            };
            (op, Vec::new())
        }
        OpSpec::Filter { input: name, predicate } => {
            let id = input(plan, name)?;
            let s = scope(plan, id);
            let predicate = s.boolean(s.bind(predicate)?)?.expr;
            (LogicalOp::Filter { predicate }, vec![id])
        }
        OpSpec::Foreach {
            input: name,
            nested,
            generate,
        } => {
            let id = input(plan, name)?;
            let inner = inner_plan(plan, id, nested, generate)?;
            (LogicalOp::Foreach { plan: inner }, vec![id])
        }
        OpSpec::Group {
            inputs,
            all,
            partitioner,
            parallel,
        } => group(plan, inputs, *all, partitioner.clone(), *parallel)?,
        OpSpec::Join {
            inputs,
            strategy,
            join_type,
            partitioner,
            parallel,
        } => {
            if inputs.len() != 2 {
                return Err(Error::Plan(format!(
                    "join '{alias}' takes exactly two inputs, got {}",
                    inputs.len()
                )));
            }
            let (ids, keys, _) = keyed(plan, inputs)?;
            let op = LogicalOp::Join {
                keys,
                qualifiers: inputs.iter().map(|k| k.input.clone()).collect(),
                strategy: *strategy,
                join_type: *join_type,
                partitioner: partitioner.clone(),
                parallel: *parallel,
            };
            (op, ids)
        }
        OpSpec::Union { inputs } => union(plan, inputs)?,
        OpSpec::Order {
            input: name,
            keys,
            parallel,
            partitioner,
        } => {
            let id = input(plan, name)?;
            let keys = sort_keys(alias, plan.schema(id), plan.lineage(id), keys)?;
            let op = LogicalOp::Order {
                keys,
                parallel: *parallel,
                partitioner: partitioner.clone(),
                limit: None,
            };
            (op, vec![id])
        }
        OpSpec::Limit { input: name, count } => {
            (LogicalOp::Limit { count: *count }, vec![input(plan, name)?])
        }
        OpSpec::Cross {
            inputs,
            partitioner,
            parallel,
        } => {
            if inputs.len() < 2 {
                return Err(Error::Plan(format!("cross '{alias}' needs at least two inputs")));
            }
            let ids = inputs
                .iter()
                .map(|i| input(plan, i))
                .collect::<Result<Vec<_>>>()?;
            let op = LogicalOp::Cross {
                qualifiers: inputs.clone(),
                partitioner: partitioner.clone(),
                parallel: *parallel,
            };
            (op, ids)
        }
        OpSpec::Store {
            input: name,
            location,
            format,
            delimiter,
        } => {
            let op = LogicalOp::Store {
                location: location.clone(),
                format: *format,
                delimiter: *delimiter,
            };
            (op, vec![input(plan, name)?])
        }
    };
    Ok(bound)
}

/// Resolve order keys to positions; keys must name orderable columns.
pub(crate) fn sort_keys(
    alias: &str,
    schema: Option<&Schema>,
    lineage: &NodeLineage,
    keys: &[OrderKey],
) -> Result<Vec<SortKey>> {
    let invalid = |reason: String| Error::InvalidSortKey {
        alias: alias.to_string(),
        reason,
    };
    let mut out = Vec::with_capacity(keys.len());
    for k in keys {
        let pos = match k.column.normalized() {
            ColumnRef::Position(p) => {
                if let Some(s) = schema {
                    if p >= s.len() {
                        return Err(invalid(format!("${p} is out of range for {{{s}}}")));
                    }
                }
                p
            }
            ColumnRef::Name(n) => {
                let s = schema
                    .ok_or_else(|| invalid(format!("'{n}' cannot be resolved without a schema")))?;
                match resolve_name(s, lineage, &n) {
                    Ok(p) => p,
                    Err(Error::FieldNotFound { .. }) => {
                        return Err(invalid(format!("'{n}' not found in {{{s}}}")))
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        if let Some(f) = schema.and_then(|s| s.field(pos)) {
            if !f.data_type.is_orderable() {
                return Err(invalid(format!(
                    "'{}' of type {} is not orderable",
                    k.column, f.data_type
                )));
            }
        }
        out.push(SortKey {
            column: pos,
            descending: k.desc,
        });
    }
    Ok(out)
}

/// Element schema and lineage of a bag-valued nested input.
fn bag_input(scope: &Scope<'_>, name: &str) -> Result<(Bound, Option<Schema>, NodeLineage)> {
    let b = scope.bind(&Expr::col(name))?;
    let l = scope.lineage_of(&b.expr);
    match b.field.data_type {
        DataType::Bag => {
            let element = b.field.schema.clone();
            let lineage = NodeLineage {
                columns: l.nested,
                rest: if element.is_some() { None } else { l.origin },
            };
            Ok((b, element, lineage))
        }
        DataType::ByteArray => Ok((
            b,
            None,
            NodeLineage {
                columns: Vec::new(),
                rest: l.origin,
            },
        )),
        other => Err(Error::TypeCheck(format!(
            "nested input '{name}' is a {other}, expected a bag"
        ))),
    }
}

fn nested_stmt(scope: &Scope<'_>, st: &NestedStmt) -> Result<(InnerOp, Field)> {
    let alias = Some(st.alias.clone());
    let bound = match &st.op {
        NestedOp::Assign { expr } => {
            let b = scope.bind(expr)?;
            (InnerOp::Expr(b.expr), b.field.with_name(alias))
        }
        NestedOp::Filter { input, predicate } => {
            let (b, element, elin) = bag_input(scope, input)?;
            let inner = Scope::new(scope.plan, element.as_ref(), &elin);
            let predicate = inner.boolean(inner.bind(predicate)?)?.expr;
            let op = InnerOp::Filter {
                input: b.expr,
                predicate,
            };
            (op, Field::bag(alias, element))
        }
        NestedOp::Order { input, keys } => {
            let (b, element, elin) = bag_input(scope, input)?;
            let keys = sort_keys(&st.alias, element.as_ref(), &elin, keys)?;
            let op = InnerOp::Order {
                input: b.expr,
                keys,
            };
            (op, Field::bag(alias, element))
        }
        NestedOp::Limit { input, count } => {
            let (b, element, _) = bag_input(scope, input)?;
            let op = InnerOp::Limit {
                input: b.expr,
                count: *count,
            };
            (op, Field::bag(alias, element))
        }
    };
    Ok(bound)
}

fn prefixed(schema: &Schema, prefix: Option<&str>) -> Vec<Field> {
    schema
        .iter()
        .map(|f| match (prefix, &f.name) {
            (Some(p), Some(n)) => f.clone().with_name(Some(format!("{p}::{n}"))),
            _ => f.clone(),
        })
        .collect()
}

/// Fields a generate item contributes; `None` when a flattened value has no
/// known element schema.
fn generated_fields(field: &Field, flatten: bool) -> Option<Vec<Field>> {
    if !flatten {
        return Some(vec![field.clone()]);
    }
    match field.data_type {
        DataType::Bag | DataType::Tuple => field
            .schema
            .as_ref()
            .map(|s| prefixed(s, field.name.as_deref())),
        DataType::ByteArray => None,
        _ => Some(vec![field.clone()]),
    }
}

/// Apply an `as` clause to the inferred fields of one generate item.
fn apply_as(
    user: &Schema,
    inferred: Option<Vec<Field>>,
    caster: CasterKind,
) -> Result<(Vec<Field>, Vec<Option<FieldCast>>)> {
    let cast_to = |f: &Field| FieldCast {
        to: f.clone().with_name(None),
        caster,
    };
    let Some(inferred) = inferred else {
        let casts = user
            .iter()
            .map(|f| (!f.is_unknown()).then(|| cast_to(f)))
            .collect();
        return Ok((user.fields.clone(), casts));
    };
    if inferred.len() != user.len() {
        let found = Schema::new(inferred);
        return Err(Error::SchemaMerge {
            position: found.len().min(user.len()),
            left: format!("{{{user}}} (arity {})", user.len()),
            right: format!("{{{found}}} (arity {})", found.len()),
        });
    }
    let mut fields = Vec::with_capacity(user.len());
    let mut casts = Vec::with_capacity(user.len());
    for (u, i) in user.iter().zip(inferred) {
        let name = u.name.clone().or_else(|| i.name.clone());
        if u.is_unknown() {
            fields.push(i.with_name(name));
            casts.push(None);
        } else if u.data_type == i.data_type && (u.schema.is_none() || u.schema == i.schema) {
            fields.push(Field {
                name,
                data_type: i.data_type,
                schema: i.schema,
            });
            casts.push(None);
        } else {
            casts.push(Some(cast_to(u)));
            fields.push(u.clone().with_name(name));
        }
    }
    Ok((fields, casts))
}

fn inner_plan(
    plan: &LogicalPlan,
    id: NodeId,
    nested: &[NestedStmt],
    generate: &[GenerateItem],
) -> Result<InnerPlan> {
    let mut locals: Vec<Local> = Vec::new();
    let mut local_lineage: Vec<ColumnLineage> = Vec::new();
    let mut stmts = Vec::with_capacity(nested.len());
    for st in nested {
        let s = scope(plan, id).with_locals(&locals, &local_lineage);
        let (op, field) = nested_stmt(&s, st)?;
        let l = s.lineage_of(op.source());
        local_lineage.push(l);
        locals.push(Local {
            name: st.alias.clone(),
            field: field.clone(),
        });
        stmts.push(InnerStmt {
            alias: st.alias.clone(),
            op,
            field,
        });
    }
    let s = scope(plan, id).with_locals(&locals, &local_lineage);
    let mut items = Vec::with_capacity(generate.len());
    for item in generate {
        let b = s.bind(&item.expr)?;
        let inferred = generated_fields(&b.field, item.flatten);
        let (fields, casts) = match &item.schema {
            None => {
                let fields = inferred.unwrap_or_default();
                let casts = vec![None; fields.len()];
                (fields, casts)
            }
            Some(text) => {
                let user: Schema = text.parse()?;
                apply_as(&user, inferred, s.caster_for(&b.expr))?
            }
        };
        items.push(GenItem {
            expr: b.expr,
            flatten: item.flatten,
            fields,
            casts,
        });
    }
    Ok(InnerPlan {
        stmts,
        generate: items,
    })
}

/// Bind keyed inputs and align each key position to one type across inputs.
fn keyed(plan: &LogicalPlan, inputs: &[KeyedInput]) -> Result<(Vec<NodeId>, Vec<Vec<Expr>>, Vec<Field>)> {
    let ids = inputs
        .iter()
        .map(|k| input(plan, &k.input))
        .collect::<Result<Vec<_>>>()?;
    let arity = inputs.first().map(|k| k.keys.len()).unwrap_or(0);
    if arity == 0 || inputs.iter().any(|k| k.keys.len() != arity) {
        return Err(Error::Plan(
            "every keyed input needs the same, non-zero number of keys".into(),
        ));
    }
    let mut bound: Vec<Vec<Bound>> = Vec::with_capacity(inputs.len());
    for (k, &id) in inputs.iter().zip(&ids) {
        let s = scope(plan, id);
        bound.push(k.keys.iter().map(|e| s.bind(e)).collect::<Result<_>>()?);
    }
    let mut targets = Vec::with_capacity(arity);
    for j in 0..arity {
        let t = bound
            .iter()
            .map(|keys| keys[j].field.data_type)
            .try_fold(DataType::ByteArray, unify)?;
        if !t.is_orderable() {
            return Err(Error::TypeCheck(format!("{t} cannot be used as a key")));
        }
        targets.push(t);
    }
    let mut keys = Vec::with_capacity(inputs.len());
    for (row, &id) in bound.into_iter().zip(&ids) {
        let s = scope(plan, id);
        keys.push(
            row.into_iter()
                .zip(&targets)
                .map(|(b, &t)| s.coerce(b, t))
                .collect::<Vec<_>>(),
        );
    }
    let key_fields: Vec<Field> = keys
        .first()
        .map(|row| row.iter().map(|b| b.field.clone()).collect())
        .unwrap_or_default();
    let exprs = keys
        .into_iter()
        .map(|row| row.into_iter().map(|b| b.expr).collect())
        .collect();
    Ok((ids, exprs, key_fields))
}

fn group(
    plan: &LogicalPlan,
    inputs: &[KeyedInput],
    all: bool,
    partitioner: Option<String>,
    parallel: Option<usize>,
) -> Result<(LogicalOp, Vec<NodeId>)> {
    if inputs.is_empty() {
        return Err(Error::Plan("group needs at least one input".into()));
    }
    let (ids, keys, key_field) = if all {
        let ids = inputs
            .iter()
            .map(|k| input(plan, &k.input))
            .collect::<Result<Vec<_>>>()?;
        (ids, Vec::new(), Field::new("group", DataType::CharArray))
    } else {
        let (ids, keys, fields) = keyed(plan, inputs)?;
        let key = match fields.as_slice() {
            [single] => Field {
                name: Some("group".into()),
                data_type: single.data_type,
                schema: single.schema.clone(),
            },
            many => Field::tuple(Some("group".into()), Some(Schema::new(many.to_vec()))),
        };
        (ids, keys, key)
    };
    let op = LogicalOp::Group {
        keys,
        key_field,
        names: inputs.iter().map(|k| k.input.clone()).collect(),
        all,
        partitioner,
        parallel,
        per_key_limits: vec![None; inputs.len()],
    };
    Ok((op, ids))
}

fn union(plan: &LogicalPlan, inputs: &[String]) -> Result<(LogicalOp, Vec<NodeId>)> {
    if inputs.len() < 2 {
        return Err(Error::Plan("union needs at least two inputs".into()));
    }
    let ids = inputs
        .iter()
        .map(|i| input(plan, i))
        .collect::<Result<Vec<_>>>()?;
    let schemas: Option<Vec<&Schema>> = ids.iter().map(|&id| plan.schema(id)).collect();
    let Some(schemas) = schemas else {
        return Ok((LogicalOp::Union { casts: vec![None; ids.len()] }, ids));
    };
    let merged = merge_all(&schemas)?;
    let mut casts = Vec::with_capacity(ids.len());
    for (&id, schema) in ids.iter().zip(&schemas) {
        let needs_cast = schema
            .iter()
            .zip(merged.iter())
            .any(|(f, m)| f.is_unknown() && !m.is_unknown());
        if !needs_cast {
            casts.push(None);
            continue;
        }
        let s = scope(plan, id);
        let projection = schema
            .iter()
            .zip(merged.iter())
            .enumerate()
            .map(|(p, (f, m))| {
                let b = Bound {
                    expr: Expr::pos(p),
                    field: f.clone(),
                };
                if f.is_unknown() && !m.is_unknown() {
                    s.coerce_field(b, m).expr
                } else {
                    b.expr
                }
            })
            .collect();
        casts.push(Some(projection));
    }
    Ok((LogicalOp::Union { casts }, ids))
}
