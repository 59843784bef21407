//! Observable, persisted conversation store

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dash_ai::Role;

use crate::{
    conversation::{ConversationState, Message, MessageId},
    error::Result,
    storage::{BlobStore, MemoryBlobStore},
};

/// Blob key the conversation is persisted under
pub const STORAGE_KEY: &str = "dash-chat-history";

/// Prefix of messages reporting a failed turn
pub const ERROR_PREFIX: &str = "Sorry, there was an error: ";

/// Message seeded into a cleared conversation
pub const GREETING: &str = "Hello! I'm DASH, your AI assistant. I can help you with business data and web searches. What would you like to know?";

/// Handle returned by [`ConversationStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&ConversationState) + Send + Sync>;

/// Notification bookkeeping
#[derive(Debug, Default)]
struct Delivery {
    /// A round of notifications is running
    active: bool,
    /// The state changed since the running round took its snapshot
    pending: bool,
}

/// Persisted form of the conversation
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedConversation {
    messages: Vec<Message>,
}

/// Owns the conversation and notifies observers of every change.
///
/// Mutations are applied under a lock; observers are called after it is
/// released, so an observer may read from or mutate the store itself. A
/// mutation made while observers are being notified is delivered once the
/// current round finishes, and every round carries the latest state.
pub struct ConversationStore {
    state: Mutex<ConversationState>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    delivery: Mutex<Delivery>,
    next_subscription: AtomicU64,
    blobs: Arc<dyn BlobStore>,
}

impl ConversationStore {
    /// Create a store hydrated from `blobs`.
    ///
    /// A missing, unreadable or corrupt blob yields an empty conversation.
    pub fn load(blobs: Arc<dyn BlobStore>) -> Self {
        let messages = match read_persisted(blobs.as_ref()) {
            Ok(Some(persisted)) => persisted.messages,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load chat history, starting empty");
                Vec::new()
            }
        };
        tracing::debug!(messages = messages.len(), "conversation loaded");

        Self {
            state: Mutex::new(ConversationState::with_messages(messages)),
            subscribers: Mutex::new(Vec::new()),
            delivery: Mutex::new(Delivery::default()),
            next_subscription: AtomicU64::new(0),
            blobs,
        }
    }

    /// Create a store backed by a fresh in-memory blob store
    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryBlobStore::new()))
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> ConversationState {
        self.state.lock().clone()
    }

    /// Register an observer.
    ///
    /// The observer is called once immediately with the current state, then
    /// after every mutation until unsubscribed.
    pub fn subscribe(
        &self,
        observer: impl Fn(&ConversationState) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let observer: Subscriber = Arc::new(observer);
        self.subscribers.lock().push((id, Arc::clone(&observer)));
        observer(&self.snapshot());
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Append a finished message
    pub fn add_message(&self, mut message: Message) {
        message.streaming = false;
        self.update(true, |state| state.messages.push(message));
    }

    /// Append a user message and return its id
    pub fn add_user_message(&self, content: impl Into<String>) -> MessageId {
        let message = Message::new(Role::User, content);
        let id = message.id;
        self.update(true, |state| state.messages.push(message));
        id
    }

    /// Append an empty streaming assistant message and return its id.
    ///
    /// A message still streaming from an earlier turn is finalized first.
    pub fn start_assistant_message(&self) -> MessageId {
        let message = Message::streaming_assistant();
        let id = message.id;
        let mut state = self.state.lock();
        let orphaned = state.finalize_streaming();
        if orphaned {
            tracing::debug!("finalized orphaned streaming message");
        }
        state.messages.push(message);
        state.streaming_id = Some(id);
        state.is_streaming = true;
        let snapshot = state.clone();
        drop(state);

        if orphaned {
            self.persist(&snapshot);
        }
        self.notify();
        id
    }

    /// Append text to the streaming message; no-op when nothing is streaming
    pub fn append_streaming_content(&self, text: &str) {
        {
            let mut state = self.state.lock();
            let Some(id) = state.streaming_id else {
                return;
            };
            match state.messages.iter_mut().find(|m| m.id == id) {
                Some(message) => message.content.push_str(text),
                None => return,
            }
        }
        self.notify();
    }

    /// Finalize the streaming message, if any, and persist
    pub fn complete_streaming(&self) {
        self.update(true, |state| {
            state.finalize_streaming();
        });
    }

    /// Finalize any streaming message and append an error message
    pub fn add_error_message(&self, error: &str) {
        let message = Message::new(Role::Assistant, format!("{}{}", ERROR_PREFIX, error));
        self.update(true, |state| {
            state.finalize_streaming();
            state.messages.push(message);
        });
    }

    /// Set whether a request is open; not persisted
    pub fn set_connected(&self, connected: bool) {
        self.update(false, |state| state.is_connected = connected);
    }

    /// Replace the conversation with a single greeting and persist it
    pub fn clear_messages(&self) {
        let greeting = Message::new(Role::Assistant, GREETING);
        self.update(true, |state| {
            *state = ConversationState::with_messages(vec![greeting]);
        });
    }

    fn update<R>(&self, persist: bool, f: impl FnOnce(&mut ConversationState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, state.clone())
        };
        if persist {
            self.persist(&snapshot);
        }
        self.notify();
        result
    }

    /// Deliver the latest state to every observer.
    ///
    /// Called while a round is already running (from an observer, or another
    /// thread), this only marks the state dirty; the running round goes again.
    fn notify(&self) {
        {
            let mut delivery = self.delivery.lock();
            delivery.pending = true;
            if delivery.active {
                return;
            }
            delivery.active = true;
        }

        loop {
            {
                let mut delivery = self.delivery.lock();
                if !delivery.pending {
                    delivery.active = false;
                    return;
                }
                delivery.pending = false;
            }

            let state = self.snapshot();
            let subscribers: Vec<Subscriber> = self
                .subscribers
                .lock()
                .iter()
                .map(|(_, s)| Arc::clone(s))
                .collect();
            for subscriber in subscribers {
                subscriber(&state);
            }
        }
    }

    fn persist(&self, state: &ConversationState) {
        if let Err(e) = write_persisted(self.blobs.as_ref(), state) {
            tracing::warn!(error = %e, "failed to save chat history");
        }
    }
}

fn read_persisted(blobs: &dyn BlobStore) -> Result<Option<PersistedConversation>> {
    match blobs.get(STORAGE_KEY)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_persisted(blobs: &dyn BlobStore, state: &ConversationState) -> Result<()> {
    let persisted = PersistedConversation {
        messages: state.completed_messages().cloned().collect(),
    };
    blobs.set(STORAGE_KEY, &serde_json::to_string(&persisted)?)
}
