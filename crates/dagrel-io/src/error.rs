use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("delimited text: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Storage(#[from] dagrel_mem::Error),

    #[error(transparent)]
    Core(#[from] dagrel_core::Error),

    #[error("invalid io configuration: {0}")]
    Config(String),

    #[error("location '{0}' not found")]
    NotFound(String),
}

impl From<Error> for dagrel_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(inner) => inner,
            Error::Storage(inner) => inner.into(),
            other => dagrel_core::Error::IoLike(other.to_string()),
        }
    }
}
