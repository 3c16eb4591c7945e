//! Error types for testsync-core

use std::path::PathBuf;

use testsync_state::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid run results: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
