use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One dialogue thread between exactly two participants.
///
/// Participants are opaque stable keys (the marketplace uses auth user ids);
/// the core never interprets them. For any unordered pair of participants at
/// most one conversation exists; the store enforces this on the normalized
/// pair, see [`crate::store::pair_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: String,
    pub participant_b: String,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store whenever a message is appended.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether the given participant is one of the two sides of this thread.
    pub fn has_participant(&self, id: &str) -> bool {
        self.participant_a == id || self.participant_b == id
    }

    /// The participant on the other side of the thread from `me`.
    pub fn peer_of(&self, me: &str) -> &str {
        if self.participant_a == me {
            &self.participant_b
        } else {
            &self.participant_a
        }
    }
}

/// One immutable unit of text within a conversation.
///
/// Ids are v7 uuids assigned by the store, so they sort by creation time
/// and serve as the tie-breaker after `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// A message this client has handed to the store but not yet seen confirmed.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// Client-local id, never leaves this process.
    pub local_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub content: String,
    pub queued_at: DateTime<Utc>,
}

/// Element of the local sequence held by an open message stream.
///
/// A send inserts a `Pending` entry immediately; it becomes `Confirmed` when
/// the store acknowledges the insert (or is removed again if the insert
/// fails, with the draft handed back to the caller).
#[derive(Debug, Clone)]
pub enum ChatEntry {
    Pending(PendingMessage),
    Confirmed(Message),
}

impl ChatEntry {
    pub fn content(&self) -> &str {
        match self {
            ChatEntry::Pending(p) => &p.content,
            ChatEntry::Confirmed(m) => &m.content,
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            ChatEntry::Pending(p) => &p.sender_id,
            ChatEntry::Confirmed(m) => &m.sender_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ChatEntry::Pending(_))
    }
}
