use thiserror::Error;

use dagrel_core::id::StageId;

#[derive(Debug, Error)]
pub enum ExecError {
    /// Rejected before any data was read.
    #[error(transparent)]
    Compile(#[from] dagrel_core::Error),

    #[error("stage #{} [{label}] failed: {source}", stage.get())]
    Stage {
        stage: StageId,
        label: String,
        #[source]
        source: dagrel_core::Error,
    },

    #[error("spill setup: {0}")]
    Spill(#[from] dagrel_mem::Error),

    #[error("no relation named '{0}' in the plan")]
    UnknownOutput(String),
}

impl ExecError {
    /// Numeric code of the underlying failure.
    pub fn code(&self) -> u32 {
        match self {
            ExecError::Compile(e) | ExecError::Stage { source: e, .. } => e.code(),
            ExecError::Spill(_) => dagrel_core::Error::IoLike(String::new()).code(),
            ExecError::UnknownOutput(_) => dagrel_core::Error::Plan(String::new()).code(),
        }
    }

    /// Stage that failed, for errors raised while running.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            ExecError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
