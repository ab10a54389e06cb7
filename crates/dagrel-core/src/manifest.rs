//! Run manifest emitted after each execution, for audit and replay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;
use crate::id::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

/// Completion record for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    pub label: String,
    pub partitions: usize,
    pub rows_in: u64,
    pub rows_out: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: ManifestId,

    /// Stable hash of the physical plan (and operator params) used.
    pub plan_hash: Hash256,

    /// Seed used by the sampling stages.
    pub seed: u64,

    /// Engine version string for provenance.
    pub engine_version: String,

    pub stages: Vec<StageReport>,

    /// Digest over the rows written by store stages, in stage order.
    pub outputs_digest: Option<Hash256>,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(plan_hash: Hash256, seed: u64, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            plan_hash,
            seed,
            engine_version: crate::VERSION.to_string(),
            stages: Vec::new(),
            outputs_digest: None,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn record(&mut self, report: StageReport) {
        self.stages.push(report);
    }

    pub fn finish(mut self, finished_ms: u64, outputs_digest: Option<Hash256>) -> Self {
        self.finished_ms = finished_ms;
        self.outputs_digest = outputs_digest;
        self
    }
}
