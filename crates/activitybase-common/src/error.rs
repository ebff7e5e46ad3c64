use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("duplicate migration: {0}")]
    DuplicateMigration(String),

    #[error("migration {name} failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("startup error: {0}")]
    Startup(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Unwraps a runner failure down to the error raised by the unit itself.
    pub fn root(&self) -> &Error {
        match self {
            Error::Migration { source, .. } => source.root(),
            other => other,
        }
    }
}
