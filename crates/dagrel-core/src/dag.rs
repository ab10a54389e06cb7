//! Operator DAG handed over by a script front end.
//!
//! Relations are listed in definition order; each names its inputs by alias.
//! Parameters are already resolved (keys, schema strings, partitioner name,
//! limit count, sort spec). The planner turns this into a schema-annotated
//! logical plan.

use serde::{Deserialize, Serialize};

use crate::codec::CasterKind;
use crate::expr::{ColumnRef, Expr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    #[default]
    Hash,
    Skewed,
    Merge,
    Replicated,
}

impl JoinStrategy {
    pub fn name(self) -> &'static str {
        match self {
            JoinStrategy::Hash => "hash join",
            JoinStrategy::Skewed => "skewed join",
            JoinStrategy::Merge => "merge join",
            JoinStrategy::Replicated => "replicated join",
        }
    }
}

/// On-storage record format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Delimited text; every field loads as bytearray.
    #[default]
    Text,
    /// Self-describing binary tuples.
    Bin,
}

impl StorageFormat {
    /// Caster used for byte-array fields when the load does not name one.
    pub fn default_caster(self) -> CasterKind {
        match self {
            StorageFormat::Text => CasterKind::Utf8,
            StorageFormat::Bin => CasterKind::Binary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpDag {
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub alias: String,
    #[serde(flatten)]
    pub op: OpSpec,
}

/// One keyed input of a group/cogroup/join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedInput {
    pub input: String,
    #[serde(default)]
    pub keys: Vec<Expr>,
}

impl KeyedInput {
    pub fn new(input: &str, keys: Vec<Expr>) -> Self {
        Self {
            input: input.to_string(),
            keys,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    pub column: ColumnRef,
    #[serde(default)]
    pub desc: bool,
}

impl OrderKey {
    pub fn asc(column: &str) -> Self {
        Self {
            column: ColumnRef::parse(column),
            desc: false,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: ColumnRef::parse(column),
            desc: true,
        }
    }
}

/// One `generate` item of a foreach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateItem {
    pub expr: Expr,
    #[serde(default)]
    pub flatten: bool,
    /// `as` clause: a schema string, e.g. `b2:int` or `c0`.
    #[serde(default)]
    pub schema: Option<String>,
}

impl GenerateItem {
    pub fn expr(expr: Expr) -> Self {
        Self {
            expr,
            flatten: false,
            schema: None,
        }
    }

    pub fn flatten(expr: Expr) -> Self {
        Self {
            expr,
            flatten: true,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }
}

/// Statement of a nested (inner) foreach plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedStmt {
    pub alias: String,
    #[serde(flatten)]
    pub op: NestedOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NestedOp {
    /// `alias = <expr>;`
    Assign { expr: Expr },
    Filter { input: String, predicate: Expr },
    Order { input: String, keys: Vec<OrderKey> },
    Limit { input: String, count: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpSpec {
    Load {
        /// One location or a comma-separated list, read in listed order.
        location: String,
        #[serde(default)]
        format: StorageFormat,
        #[serde(default)]
        schema: Option<String>,
        #[serde(default)]
        caster: Option<CasterKind>,
        #[serde(default)]
        delimiter: Option<char>,
    },
    Filter {
        input: String,
        predicate: Expr,
    },
    Foreach {
        input: String,
        #[serde(default)]
        nested: Vec<NestedStmt>,
        generate: Vec<GenerateItem>,
    },
    /// Group (one input) or cogroup (several).
    #[serde(alias = "cogroup")]
    Group {
        inputs: Vec<KeyedInput>,
        #[serde(default)]
        all: bool,
        #[serde(default)]
        partitioner: Option<String>,
        #[serde(default)]
        parallel: Option<usize>,
    },
    Join {
        inputs: Vec<KeyedInput>,
        #[serde(default)]
        strategy: JoinStrategy,
        #[serde(default)]
        join_type: JoinType,
        #[serde(default)]
        partitioner: Option<String>,
        #[serde(default)]
        parallel: Option<usize>,
    },
    Union {
        inputs: Vec<String>,
    },
    Order {
        input: String,
        keys: Vec<OrderKey>,
        #[serde(default)]
        parallel: Option<usize>,
        #[serde(default)]
        partitioner: Option<String>,
    },
    Limit {
        input: String,
        count: u64,
    },
    Cross {
        inputs: Vec<String>,
        #[serde(default)]
        partitioner: Option<String>,
        #[serde(default)]
        parallel: Option<usize>,
    },
    Store {
        input: String,
        location: String,
        #[serde(default)]
        format: StorageFormat,
        #[serde(default)]
        delimiter: Option<char>,
    },
}

impl OpSpec {
    /// Aliases this operator reads from.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            OpSpec::Load { .. } => Vec::new(),
            OpSpec::Filter { input, .. }
            | OpSpec::Foreach { input, .. }
            | OpSpec::Order { input, .. }
            | OpSpec::Limit { input, .. }
            | OpSpec::Store { input, .. } => vec![input.as_str()],
            OpSpec::Group { inputs, .. } | OpSpec::Join { inputs, .. } => {
                inputs.iter().map(|k| k.input.as_str()).collect()
            }
            OpSpec::Union { inputs } | OpSpec::Cross { inputs, .. } => {
                inputs.iter().map(String::as_str).collect()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OpSpec::Load { .. } => "load",
            OpSpec::Filter { .. } => "filter",
            OpSpec::Foreach { .. } => "foreach",
            OpSpec::Group { inputs, .. } if inputs.len() > 1 => "cogroup",
            OpSpec::Group { .. } => "group",
            OpSpec::Join { .. } => "join",
            OpSpec::Union { .. } => "union",
            OpSpec::Order { .. } => "order",
            OpSpec::Limit { .. } => "limit",
            OpSpec::Cross { .. } => "cross",
            OpSpec::Store { .. } => "store",
        }
    }

    pub fn load(location: &str, schema: Option<&str>) -> Self {
        OpSpec::Load {
            location: location.to_string(),
            format: StorageFormat::Text,
            schema: schema.map(str::to_string),
            caster: None,
            delimiter: None,
        }
    }

    pub fn load_bin(location: &str, schema: Option<&str>) -> Self {
        OpSpec::Load {
            location: location.to_string(),
            format: StorageFormat::Bin,
            schema: schema.map(str::to_string),
            caster: None,
            delimiter: None,
        }
    }

    pub fn filter(input: &str, predicate: Expr) -> Self {
        OpSpec::Filter {
            input: input.to_string(),
            predicate,
        }
    }

    pub fn foreach(input: &str, generate: Vec<GenerateItem>) -> Self {
        OpSpec::Foreach {
            input: input.to_string(),
            nested: Vec::new(),
            generate,
        }
    }

    pub fn foreach_nested(input: &str, nested: Vec<NestedStmt>, generate: Vec<GenerateItem>) -> Self {
        OpSpec::Foreach {
            input: input.to_string(),
            nested,
            generate,
        }
    }

    pub fn group(input: &str, keys: Vec<Expr>) -> Self {
        OpSpec::cogroup(vec![KeyedInput::new(input, keys)])
    }

    pub fn group_all(input: &str) -> Self {
        OpSpec::Group {
            inputs: vec![KeyedInput::new(input, Vec::new())],
            all: true,
            partitioner: None,
            parallel: None,
        }
    }

    pub fn cogroup(inputs: Vec<KeyedInput>) -> Self {
        OpSpec::Group {
            inputs,
            all: false,
            partitioner: None,
            parallel: None,
        }
    }

    pub fn join(inputs: Vec<KeyedInput>, strategy: JoinStrategy) -> Self {
        OpSpec::Join {
            inputs,
            strategy,
            join_type: JoinType::Inner,
            partitioner: None,
            parallel: None,
        }
    }

    pub fn union(inputs: &[&str]) -> Self {
        OpSpec::Union {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn order(input: &str, keys: Vec<OrderKey>) -> Self {
        OpSpec::Order {
            input: input.to_string(),
            keys,
            parallel: None,
            partitioner: None,
        }
    }

    pub fn limit(input: &str, count: u64) -> Self {
        OpSpec::Limit {
            input: input.to_string(),
            count,
        }
    }

    pub fn cross(inputs: &[&str]) -> Self {
        OpSpec::Cross {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            partitioner: None,
            parallel: None,
        }
    }

    pub fn store(input: &str, location: &str, format: StorageFormat) -> Self {
        OpSpec::Store {
            input: input.to_string(),
            location: location.to_string(),
            format,
            delimiter: None,
        }
    }

    /// Attach `PARTITION BY <name>`; ignored by operators without a shuffle key.
    pub fn partition_by(mut self, name: &str) -> Self {
        match &mut self {
            OpSpec::Group { partitioner, .. }
            | OpSpec::Join { partitioner, .. }
            | OpSpec::Order { partitioner, .. }
            | OpSpec::Cross { partitioner, .. } => *partitioner = Some(name.to_string()),
            _ => {}
        }
        self
    }

    /// Attach `PARALLEL n`.
    pub fn parallel(mut self, n: usize) -> Self {
        match &mut self {
            OpSpec::Group { parallel, .. }
            | OpSpec::Join { parallel, .. }
            | OpSpec::Order { parallel, .. }
            | OpSpec::Cross { parallel, .. } => *parallel = Some(n),
            _ => {}
        }
        self
    }

    /// Set the storage caster on a load.
    pub fn with_caster(mut self, kind: CasterKind) -> Self {
        if let OpSpec::Load { caster, .. } = &mut self {
            *caster = Some(kind);
        }
        self
    }

    /// Set the field delimiter on a text load or store.
    pub fn with_delimiter(mut self, c: char) -> Self {
        if let OpSpec::Load { delimiter, .. } | OpSpec::Store { delimiter, .. } = &mut self {
            *delimiter = Some(c);
        }
        self
    }

    pub fn with_join_type(mut self, t: JoinType) -> Self {
        if let OpSpec::Join { join_type, .. } = &mut self {
            *join_type = t;
        }
        self
    }
}

impl OpDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a relation; later definitions of an alias shadow earlier ones.
    pub fn push(&mut self, alias: &str, op: OpSpec) -> &mut Self {
        self.relations.push(Relation {
            alias: alias.to_string(),
            op,
        });
        self
    }
}

impl NestedStmt {
    pub fn assign(alias: &str, expr: Expr) -> Self {
        Self {
            alias: alias.to_string(),
            op: NestedOp::Assign { expr },
        }
    }

    pub fn order(alias: &str, input: &str, keys: Vec<OrderKey>) -> Self {
        Self {
            alias: alias.to_string(),
            op: NestedOp::Order {
                input: input.to_string(),
                keys,
            },
        }
    }

    pub fn limit(alias: &str, input: &str, count: u64) -> Self {
        Self {
            alias: alias.to_string(),
            op: NestedOp::Limit {
                input: input.to_string(),
                count,
            },
        }
    }

    pub fn filter(alias: &str, input: &str, predicate: Expr) -> Self {
        Self {
            alias: alias.to_string(),
            op: NestedOp::Filter {
                input: input.to_string(),
                predicate,
            },
        }
    }
}
