// In-process reference implementation of the store contract.
//
// Used by the test suite and anywhere a backend-free store is handy. It
// enforces the same contract as the SQLite store, including uniqueness of
// the normalized participant pair.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::models::{Conversation, Message};
use crate::store::{fan_out, pair_key, ChatStore, StoreError, Subscription};

const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    /// Normalized pair -> conversation id. One entry per unordered pair.
    pairs: HashMap<(String, String), Uuid>,
    /// Insertion order doubles as creation order.
    messages: HashMap<Uuid, Vec<Message>>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    tx: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        MemoryStore {
            inner: Arc::new(Mutex::new(Inner::default())),
            tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.lock().await;
        let id = inner.pairs.get(&pair_key(a, b));
        Ok(id.and_then(|id| inner.conversations.get(id)).cloned())
    }

    async fn create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = pair_key(a, b);
        if inner.pairs.contains_key(&key) {
            return Err(StoreError::PairConflict(a.to_owned(), b.to_owned()));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            participant_a: a.to_owned(),
            participant_b: b.to_owned(),
            created_at: now,
            updated_at: now,
        };
        info!("created conversation {} for ({}, {})", conversation.id, a, b);

        inner.pairs.insert(key, conversation.id);
        inner.messages.insert(conversation.id, Vec::new());
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn list_conversations(
        &self,
        participant: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.has_participant(participant))
            .cloned()
            .collect();
        out.sort_by(|x, y| y.updated_at.cmp(&x.updated_at).then(y.id.cmp(&x.id)));
        Ok(out)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .get(&conversation_id)
            .cloned()
            .ok_or(StoreError::ConversationNotFound(conversation_id))
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().await;
        let conversation = inner
            .conversations
            .get(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if !conversation.has_participant(sender) {
            return Err(StoreError::ForeignSender {
                sender: sender.to_owned(),
                conversation_id,
            });
        }

        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id: sender.to_owned(),
            content: content.to_owned(),
            created_at: Utc::now(),
            read: false,
        };

        inner
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        if let Some(c) = inner.conversations.get_mut(&conversation_id) {
            c.updated_at = message.created_at;
        }
        drop(inner);

        fan_out(&self.tx, &message);
        Ok(message)
    }

    fn subscribe(&self, conversation_id: Uuid) -> Subscription {
        Subscription::new(conversation_id, self.tx.subscribe())
    }
}
