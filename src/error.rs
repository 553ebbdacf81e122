use std::time::Duration;
use thiserror::Error;

/// Main error type for mongowatch
#[derive(Error, Debug)]
pub enum IngestError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed JSON or a top-level value that is not an object
    #[error("Parse error: {0}")]
    Parse(String),

    /// The document has no `Action` field to route on
    #[error("Routing key missing: document has no \"Action\" field")]
    RoutingKeyMissing,

    /// A recognised field is present but unusable
    #[error("Invalid field \"{field}\": {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The document cannot be represented as BSON
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Insert or connection failure reported by the database driver
    #[error("Database error: {0}")]
    Database(String),

    /// Insert did not complete within the configured timeout
    #[error("Database insert timed out after {0:?}")]
    Timeout(Duration),

    /// Watcher-internal failure (e.g. event buffer overflow)
    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl IngestError {
    /// Whether another attempt on the same file may succeed.
    ///
    /// Document-shaped failures never fix themselves, so they are terminal;
    /// driver and I/O failures are worth another try after the retry delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Io(_) | IngestError::Database(_) | IngestError::Timeout(_)
        )
    }
}

impl From<mongodb::error::Error> for IngestError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::InvalidArgument { .. }
            | ErrorKind::BsonSerialization(_)
            | ErrorKind::BsonDeserialization(_) => IngestError::InvalidDocument(err.to_string()),
            _ => IngestError::Database(err.to_string()),
        }
    }
}

/// Convenient Result type using IngestError
pub type Result<T> = std::result::Result<T, IngestError>;
