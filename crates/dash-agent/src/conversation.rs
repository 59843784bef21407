//! Conversation state: messages, streaming status and connection status.

use chrono::{DateTime, Utc};
use dash_ai::{HistoryEntry, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a message; never reused
pub type MessageId = Uuid;

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Creation time; persisted under `timestamp`
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Content is still being appended. Never persisted.
    #[serde(skip)]
    pub streaming: bool,
}

impl Message {
    /// Create a finished message with a fresh id
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            streaming: false,
        }
    }

    /// Create an empty assistant message that is still streaming
    pub fn streaming_assistant() -> Self {
        Self {
            streaming: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    /// Reduce to the `{role, content}` pair sent as history
    pub fn to_history(&self) -> HistoryEntry {
        HistoryEntry::new(self.role, self.content.clone())
    }
}

/// Conversation state.
///
/// `streaming_id` is `Some` exactly when one message has `streaming` set, and
/// names that message. `is_streaming` mirrors `streaming_id.is_some()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// Messages in display order
    pub messages: Vec<Message>,
    /// An assistant message is streaming
    pub is_streaming: bool,
    /// A request to the service is open
    pub is_connected: bool,
    /// The streaming message, if any
    pub streaming_id: Option<MessageId>,
}

impl ConversationState {
    /// State holding already finished messages, with all flags cleared
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// The message currently being streamed
    pub fn current_streaming_message(&self) -> Option<&Message> {
        let id = self.streaming_id?;
        self.messages.iter().find(|m| m.id == id)
    }

    /// Finished messages, in order
    pub fn completed_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.streaming)
    }

    /// Finished messages reduced to the history sent with a request
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.completed_messages().map(Message::to_history).collect()
    }

    /// Look up a message by id
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Clear the streaming flag on the active message, if any.
    ///
    /// Returns whether a message was finalized.
    pub(crate) fn finalize_streaming(&mut self) -> bool {
        self.is_streaming = false;
        let Some(id) = self.streaming_id.take() else {
            return false;
        };
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.streaming = false;
                true
            }
            None => false,
        }
    }
}
