//! Error types for dash-ai

use thiserror::Error;

/// Result type alias using dash-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the chat service
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request or body read failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// The response carried no body to stream
    #[error("No response body received")]
    MissingBody,

    /// The stream reported an error line
    #[error("{0}")]
    Protocol(String),

    /// The turn was cancelled locally
    #[error("Request aborted")]
    Aborted,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a status error from a status code and its reason phrase
    pub fn status(status: u16, reason: impl Into<String>) -> Self {
        Self::Status {
            status,
            reason: reason.into(),
        }
    }

    /// Check if this error came from the transport (status, body or connection)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Status { .. } | Error::MissingBody
        )
    }
}
