//! YAML operator-DAG documents.
//!
//! Example:
//! ```yaml
//! config:
//!   default_parallelism: 4
//! relations:
//!   - alias: A
//!     op: load
//!     location: "data/a.txt"
//!     schema: "name:chararray, age:int"
//!   - alias: B
//!     op: filter
//!     input: A
//!     predicate: { binary: { op: gt, left: { col: age }, right: { lit: { int: 30 } } } }
//!   - alias: S
//!     op: store
//!     input: B
//!     location: "out/b"
//! outputs: [B]
//! ```
//!
//! Expressions use their structured serde form; schemas are schema strings.

use std::collections::HashSet;

use dagrel_core::config::EngineConfig;
use dagrel_core::dag::{OpDag, Relation};
use dagrel_core::error::Error;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum DslError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Invalid(#[from] Error),
}

/// `config:` block; every field is optional and overrides the engine default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub mem_cap_bytes: Option<usize>,
    pub default_parallelism: Option<usize>,
    pub seed: Option<u64>,
    pub sample_size: Option<usize>,
    pub skew_threshold: Option<f64>,
    pub bag_spill_rows: Option<usize>,
    pub spill_dir: Option<String>,
    pub spill_codec: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.mem_cap_bytes {
            cfg.mem_cap_bytes = v;
        }
        if let Some(v) = self.default_parallelism {
            cfg.default_parallelism = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = self.sample_size {
            cfg.sample_size = v;
        }
        if let Some(v) = self.skew_threshold {
            cfg.skew_threshold = v;
        }
        if let Some(v) = self.bag_spill_rows {
            cfg.bag_spill_rows = v;
        }
        if let Some(v) = &self.spill_dir {
            cfg.spill_dir = v.clone();
        }
        if let Some(v) = &self.spill_codec {
            cfg.spill_codec = v.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    config: ConfigOverrides,
    relations: Vec<Relation>,
    #[serde(default)]
    outputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedDag {
    pub dag: OpDag,
    pub config: ConfigOverrides,
    /// Aliases to collect besides the stores.
    pub outputs: Vec<String>,
}

/// Parse a document and check that every alias is defined before use.
pub fn parse_yaml_dag(src: &str) -> Result<ParsedDag, DslError> {
    let doc: Document = serde_yaml::from_str(src)?;
    let mut defined: HashSet<&str> = HashSet::new();
    for rel in &doc.relations {
        if rel.alias.is_empty() {
            return Err(Error::Plan("relation with an empty alias".into()).into());
        }
        if let Some(missing) = rel.op.inputs().into_iter().find(|i| !defined.contains(i)) {
            return Err(Error::Plan(format!(
                "relation '{}' reads undefined alias '{missing}'",
                rel.alias
            ))
            .into());
        }
        defined.insert(&rel.alias);
    }
    if let Some(missing) = doc.outputs.iter().find(|o| !defined.contains(o.as_str())) {
        return Err(Error::Plan(format!("output names undefined alias '{missing}'")).into());
    }
    Ok(ParsedDag {
        dag: OpDag {
            relations: doc.relations,
        },
        config: doc.config,
        outputs: doc.outputs,
    })
}
