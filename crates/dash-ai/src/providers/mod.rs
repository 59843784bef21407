//! Chat service transports

pub mod http;

use crate::{ByteStream, ChatRequest, Result};
use async_trait::async_trait;

pub use http::HttpTransport;

/// Path of the streaming chat endpoint, relative to the base URL
pub const CHAT_STREAM_PATH: &str = "/api/chat/stream";

/// Default base URL when none is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Response head plus the body stream, as returned by a transport.
///
/// Status checking is left to the caller so that a non-success status and a
/// missing body can be reported as distinct failures.
pub struct ChatResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase for the status
    pub reason: String,
    /// Body stream, if the response has one
    pub body: Option<ByteStream>,
}

impl ChatResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Trait for issuing a chat request and opening the response stream
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send the request and return once the response head has arrived
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> ChatResponse {
        ChatResponse {
            status,
            reason: String::new(),
            body: None,
        }
    }

    #[test]
    fn test_is_success() {
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(199).is_success());
        assert!(!response(304).is_success());
        assert!(!response(500).is_success());
    }
}
