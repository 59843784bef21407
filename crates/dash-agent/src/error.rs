//! Error types for dash-agent

use thiserror::Error;

/// Result type alias using dash-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the conversation layer
#[derive(Error, Debug)]
pub enum Error {
    /// Persisted history could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blob store failed to read or write
    #[error("Storage error: {0}")]
    Storage(String),

    /// File-backed blob store I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
