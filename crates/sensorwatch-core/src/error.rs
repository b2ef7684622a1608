//! Error types for sensorwatch.
//!
//! Only [`Error::ExportEncoding`] and [`Error::Config`] are meant to reach a
//! caller as hard failures. Malformed input and unavailable sources are
//! handled inside the ingestion path: counted, logged, and dropped or retried.

use thiserror::Error;

/// Result type alias for sensorwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for sensorwatch.
#[derive(Error, Debug)]
pub enum Error {
    /// A feed message or dataset row is missing required fields or carries a
    /// value of the wrong shape.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Transient failure reaching the feed or dataset.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The chosen export format cannot represent a value.
    #[error("export encoding failed: {0}")]
    ExportEncoding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::ExportEncoding(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::SourceUnavailable(e.to_string())
    }
}
