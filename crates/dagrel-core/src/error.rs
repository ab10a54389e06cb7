use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

/// Compile-time and data-model errors.
///
/// Every variant carries a stable numeric code (see [`Error::code`]); the codes
/// are part of the external contract and must not be renumbered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Cannot merge schemas at position {position}: {left} vs {right}")]
    SchemaMerge {
        position: usize,
        left: String,
        right: String,
    },

    #[error("custom partitioner not supported for {strategy} (relation '{alias}')")]
    UnsupportedPartitioner { alias: String, strategy: String },

    #[error("Cannot describe nested alias '{nested}' of relation '{alias}': {reason}")]
    NestedAlias {
        alias: String,
        nested: String,
        reason: String,
    },

    #[error("Ambiguous reference '{name}', candidates: {}", candidates.join(", "))]
    AmbiguousReference {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Field '{name}' not found in schema {schema}")]
    FieldNotFound { name: String, schema: String },

    #[error("Invalid sort key in relation '{alias}': {reason}")]
    InvalidSortKey { alias: String, reason: String },

    #[error("Type error: {0}")]
    TypeCheck(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Evaluation error: {0}")]
    Eval(String),

    // The core crate does not do I/O, but higher layers may map their I/O
    // errors into this variant for convenience.
    #[error("I/O-like error (mapped into core): {0}")]
    IoLike(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    /// Stable numeric code surfaced to callers.
    pub fn code(&self) -> u32 {
        match self {
            Error::UnsupportedPartitioner { .. } => 1000,
            Error::AmbiguousReference { .. } => 1025,
            Error::InvalidSortKey { .. } => 1036,
            Error::TypeCheck(_) => 1039,
            Error::NestedAlias { .. } => 1113,
            Error::SchemaMerge { .. } => 1117,
            Error::FieldNotFound { .. } => 1128,
            Error::Plan(_) => 1200,
            Error::Config(_) => 1201,
            Error::Eval(_) => 2078,
            Error::Codec(_) => 2088,
            Error::Hash(_) => 2996,
            Error::IoLike(_) => 2997,
            Error::Invariant(_) => 2998,
        }
    }

    /// Compile-time errors abort before any data is read and are never retried.
    pub fn is_compile_error(&self) -> bool {
        self.code() < 2000
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let merge = Error::SchemaMerge {
            position: 0,
            left: "int".into(),
            right: "chararray".into(),
        };
        assert_eq!(merge.code(), 1117);
        assert!(merge.to_string().contains("Cannot merge"));

        let part = Error::UnsupportedPartitioner {
            alias: "j".into(),
            strategy: "skewed join".into(),
        };
        assert_eq!(part.code(), 1000);
        assert!(part
            .to_string()
            .contains("custom partitioner not supported for skewed join"));
        assert!(part.is_compile_error());
        assert!(!Error::Codec("x".into()).is_compile_error());
    }
}
