use thiserror::Error;

/// Result type local to dagrel-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("memory budget exceeded for tag '{tag}': requested {requested} bytes, capacity {capacity}, used {used}")]
    BudgetExceeded {
        tag: &'static str,
        requested: usize,
        capacity: usize,
        used: usize,
    },

    #[error("spill storage error: {0}")]
    Storage(String),

    #[error("unsupported codec: {0}")]
    CodecUnsupported(&'static str),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checksum mismatch in segment '{0}'")]
    ChecksumMismatch(String),

    #[error("page decode failed: {0}")]
    Decode(#[from] dagrel_core::Error),
}

impl From<Error> for dagrel_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Decode(inner) => inner,
            other => dagrel_core::Error::IoLike(other.to_string()),
        }
    }
}
