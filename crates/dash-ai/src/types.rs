//! Wire types for the chat service

use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Get the wire name for this role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A prior message as sent to the service for context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat/stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The new user message
    pub message: String,
    /// Completed conversation so far, oldest first
    pub history: Vec<HistoryEntry>,
}

/// One structured line of the response stream.
///
/// Every key is optional; an absent key means "not present", never a default
/// value sent by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamRecord {
    /// Text to append to the assistant message
    #[serde(default)]
    pub content: Option<String>,
    /// Terminal error reported by the service
    #[serde(default)]
    pub error: Option<String>,
    /// The assistant message is finished
    #[serde(default)]
    pub complete: Option<bool>,
}

impl StreamRecord {
    /// Read the known keys from a JSON object, each on its own.
    ///
    /// A key holding a value of the wrong type is treated as absent without
    /// affecting the others.
    pub fn from_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let text = |key: &str| object.get(key).and_then(|v| v.as_str()).map(String::from);
        Self {
            content: text("content"),
            error: text("error"),
            complete: object.get("complete").and_then(|v| v.as_bool()),
        }
    }

    /// The error text, if this record reports one.
    ///
    /// An empty `error` string does not count as an error.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Content to append, if any
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Whether this record marks the message complete
    pub fn is_complete(&self) -> bool {
        self.complete.unwrap_or(false)
    }
}
