//! Error types for testsync-state

use thiserror::Error;

/// Errors that can occur while talking to a record store
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record with the given id exists in the store
    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    /// Local file access failed
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote API answered with a non-success status
    #[error("Store API returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Remote API could not be reached
    #[error("Store transport failed: {0}")]
    Transport(String),

    /// The remote database does not carry the expected properties
    #[error("Invalid store schema:\n{}", .issues.join("\n"))]
    Schema { issues: Vec<String> },

    /// A remote payload was missing a field the store relies on
    #[error("Malformed store payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Transport(err.to_string())
    }
}
