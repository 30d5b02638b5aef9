use thiserror::Error;

/// Core error type shared across ticdat crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema declaration violates structural rules.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// An operation was applied to an object that cannot support it.
    #[error("usage error: {0}")]
    Usage(String),
    /// Raw data does not fit the declared shape of a table.
    #[error("bad data for table '{table}': {message}")]
    Structure { table: String, message: String },
    /// A frozen table or row was asked to change.
    #[error("table '{0}' is frozen and cannot be modified")]
    Frozen(String),
    /// A row predicate (or its argument maker) raised and the caller asked for propagation.
    #[error("predicate '{predicate}' on table '{table}' raised: {message}")]
    Predicate {
        table: String,
        predicate: String,
        message: String,
    },
    /// The foreign key graph has no parent-before-child ordering.
    #[error("foreign keys form a cycle through: {}", .0.join(", "))]
    CyclicForeignKeys(Vec<String>),
}

impl Error {
    pub(crate) fn structure(table: &str, message: impl Into<String>) -> Self {
        Error::Structure {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by ticdat crates.
pub type Result<T> = std::result::Result<T, Error>;
