use std::sync::Arc;

use crate::chat::{ChatError, ConversationResolver, MessageStream, StreamState};
use crate::models::{ChatEntry, Conversation, Message};
use crate::store::ChatStore;

/// One open chat view: the conversation with a single peer plus the live
/// stream over it.
///
/// This is the composition the chat screen performs when it opens: resolve
/// the pair to a conversation, then bring a stream live on it. If resolution
/// or the history load fails the session never comes into existence, so a
/// constructed session always has a valid conversation behind it.
pub struct ChatSession {
    conversation: Conversation,
    stream: MessageStream,
}

impl ChatSession {
    /// Open the chat between `me` and `peer`, creating the conversation on
    /// first contact.
    pub async fn open(
        store: Arc<dyn ChatStore>,
        me: &str,
        peer: &str,
    ) -> Result<Self, ChatError> {
        let resolver = ConversationResolver::new(store.clone());
        let conversation = resolver.resolve(me, peer).await?;

        let mut stream = MessageStream::new(store, me);
        stream.open(conversation.id).await?;

        Ok(ChatSession {
            conversation,
            stream,
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn peer_id(&self) -> &str {
        self.conversation.peer_of(self.stream.self_id())
    }

    pub fn entries(&self) -> &[ChatEntry] {
        self.stream.entries()
    }

    pub fn is_live(&self) -> bool {
        self.stream.state() == StreamState::Live
    }

    pub async fn send(&mut self, body: &str) -> Result<Message, ChatError> {
        self.stream.send(body).await
    }

    pub async fn next_message(&mut self) -> Result<Option<Message>, ChatError> {
        self.stream.next_message().await
    }

    /// Closing the view closes the stream; the session keeps only the
    /// conversation record afterwards.
    pub fn close(&mut self) {
        self.stream.close();
    }
}
