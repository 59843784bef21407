//! dash-agent: conversation state and the streaming chat client
//!
//! This crate owns the observable, persisted conversation and the client that
//! runs a chat turn against the service and streams the reply into it.

pub mod client;
pub mod conversation;
pub mod error;
pub mod storage;
pub mod store;

pub use client::StreamingChatClient;
pub use conversation::{ConversationState, Message, MessageId};
pub use error::{Error, Result};
pub use storage::{BlobStore, MemoryBlobStore};
pub use store::{ConversationStore, ERROR_PREFIX, GREETING, STORAGE_KEY, SubscriptionId};
