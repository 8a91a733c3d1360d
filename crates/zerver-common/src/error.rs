use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration not found: {0}")]
    NodeNotFound(String),

    #[error("circular dependency: {0}")]
    CircularDependency(String),

    #[error("inconsistent migration history: {0}")]
    InconsistentHistory(String),

    #[error("migration {0} is already applied")]
    AlreadyApplied(String),

    #[error("migration {0} is not applied")]
    NotApplied(String),

    #[error("table '{table}' already has a column named '{column}'")]
    DuplicateColumn { table: String, column: String },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("table '{table}' has no column named '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
