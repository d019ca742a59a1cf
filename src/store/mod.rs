// Store contract for the chat core.
//
// The durable owner of all conversation and message records is an external
// store (the marketplace backend). The core consumes it through this trait;
// two implementations ship with the crate: an in-process reference store and
// a sqlx/SQLite store.

use async_trait::async_trait;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Conversation, Message};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors surfaced by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A conversation for this unordered participant pair already exists.
    /// The caller lost a creation race and should re-query.
    #[error("conversation for pair ({0}, {1}) already exists")]
    PairConflict(String, String),

    /// No conversation with this id.
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    /// The sender is not one of the conversation's two participants.
    #[error("sender {sender} is not a participant of conversation {conversation_id}")]
    ForeignSender { sender: String, conversation_id: Uuid },

    /// A stored record could not be decoded.
    #[error("invalid stored record: {0}")]
    Decode(String),

    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Normalize an unordered participant pair to a stable ordered key.
///
/// A conversation between X and Y is the same thread no matter which side
/// opened it; uniqueness is enforced on this normalized form.
pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_owned(), b.to_owned())
    } else {
        (b.to_owned(), a.to_owned())
    }
}

/// Query/insert/subscribe surface of the marketplace backend.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Look up the conversation for an unordered participant pair.
    async fn find_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Create the conversation for a pair. Id and timestamps are assigned by
    /// the store. Fails with [`StoreError::PairConflict`] if a conversation
    /// for the same unordered pair already exists.
    async fn create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError>;

    /// All conversations the participant is in, most recently active first.
    async fn list_conversations(&self, participant: &str)
        -> Result<Vec<Conversation>, StoreError>;

    /// Full message history of a conversation, created_at ascending, ties
    /// broken by id (insertion order).
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError>;

    /// Append a message. The store assigns id and timestamp, bumps the
    /// conversation's `updated_at`, and fans the record out to live
    /// subscribers. The sender must be a participant of the conversation.
    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender: &str,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// Open a live feed of messages inserted into one conversation from this
    /// point onward. Dropping the handle unsubscribes.
    fn subscribe(&self, conversation_id: Uuid) -> Subscription;
}

/// Live feed of newly inserted messages for a single conversation.
///
/// The store broadcasts every insert as a JSON payload; the subscription
/// decodes and filters to its conversation. Payloads that fail to decode are
/// skipped, and a lagged receiver logs a warning and keeps going.
pub struct Subscription {
    conversation_id: Uuid,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub(crate) fn new(conversation_id: Uuid, rx: broadcast::Receiver<String>) -> Self {
        Subscription { conversation_id, rx }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Wait for the next message in this conversation. Returns `None` once
    /// the store side of the feed has gone away.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => {
                    if let Some(msg) = self.decode(&payload) {
                        return Some(msg);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("live feed lagged, {} event(s) dropped by the transport", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain any already-delivered events without waiting. Used to replay
    /// events that were buffered while the history fetch was in flight.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(payload) => {
                    if let Some(msg) = self.decode(&payload) {
                        out.push(msg);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("live feed lagged, {} event(s) dropped by the transport", n);
                }
                Err(_) => break,
            }
        }
        out
    }

    fn decode(&self, payload: &str) -> Option<Message> {
        match serde_json::from_str::<Message>(payload) {
            Ok(msg) if msg.conversation_id == self.conversation_id => Some(msg),
            Ok(_) => None, // another conversation's insert
            Err(e) => {
                warn!("skipping undecodable live feed payload: {}", e);
                None
            }
        }
    }
}

/// Serialize a freshly inserted message onto a store's broadcast channel.
///
/// A send error only means no subscriber is currently listening.
pub(crate) fn fan_out(tx: &broadcast::Sender<String>, message: &Message) {
    match serde_json::to_string(message) {
        Ok(payload) => {
            if tx.send(payload).is_err() {
                debug!("no live subscribers for message {}", message.id);
            }
        }
        Err(e) => warn!("failed to encode message {} for fan-out: {}", message.id, e),
    }
}
