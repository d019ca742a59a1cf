use std::sync::Arc;

use log::{debug, info};

use crate::chat::ChatError;
use crate::models::Conversation;
use crate::store::{ChatStore, StoreError};

/// Maps a (me, peer) participant pair to the single conversation between
/// them, creating it lazily on first contact.
///
/// The pair is unordered: `resolve(a, b)` and `resolve(b, a)` name the same
/// thread. Two clients racing to create the thread are serialized by the
/// store's uniqueness constraint on the normalized pair; the loser re-queries
/// and uses the winner's row.
pub struct ConversationResolver {
    store: Arc<dyn ChatStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        ConversationResolver { store }
    }

    /// Find or create the conversation between `me` and `peer`.
    pub async fn resolve(&self, me: &str, peer: &str) -> Result<Conversation, ChatError> {
        if me.trim().is_empty() || peer.trim().is_empty() {
            return Err(ChatError::EmptyParticipant);
        }
        if me == peer {
            return Err(ChatError::SelfConversation(me.to_owned()));
        }

        if let Some(existing) = self
            .store
            .find_conversation(me, peer)
            .await
            .map_err(ChatError::Resolution)?
        {
            debug!("resolved existing conversation {}", existing.id);
            return Ok(existing);
        }

        match self.store.create_conversation(me, peer).await {
            Ok(created) => Ok(created),
            Err(StoreError::PairConflict(..)) => {
                // Someone else created the thread between our find and our
                // create. Theirs is the row to use.
                info!("lost conversation creation race for ({}, {}), re-querying", me, peer);
                self.store
                    .find_conversation(me, peer)
                    .await
                    .map_err(ChatError::Resolution)?
                    .ok_or_else(|| {
                        ChatError::Resolution(StoreError::Unavailable(
                            "conversation vanished after pair conflict".to_owned(),
                        ))
                    })
            }
            Err(e) => Err(ChatError::Resolution(e)),
        }
    }

    /// All conversations the participant is in, most recently active first.
    /// Backs the conversation sidebar of the messages screen.
    pub async fn conversations(&self, participant: &str) -> Result<Vec<Conversation>, ChatError> {
        if participant.trim().is_empty() {
            return Err(ChatError::EmptyParticipant);
        }
        self.store
            .list_conversations(participant)
            .await
            .map_err(ChatError::Resolution)
    }
}
