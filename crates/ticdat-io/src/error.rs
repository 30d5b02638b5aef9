use thiserror::Error;

/// Errors raised while reading or writing datasets.
#[derive(Debug, Error)]
pub enum IoError {
    #[error(transparent)]
    Core(#[from] ticdat_core::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad {format} input for table '{table}': {message}")]
    Format {
        format: &'static str,
        table: String,
        message: String,
    },
}

impl IoError {
    pub(crate) fn format(format: &'static str, table: &str, message: impl Into<String>) -> Self {
        IoError::Format {
            format,
            table: table.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for dataset readers and writers.
pub type Result<T> = std::result::Result<T, IoError>;
