use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::chat::ChatError;
use crate::models::{ChatEntry, Message, PendingMessage};
use crate::store::{ChatStore, Subscription};

/// Lifecycle of a message stream. `Closed` is terminal; reopening a
/// conversation takes a fresh stream, which reloads the same history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No conversation bound yet.
    Idle,
    /// Conversation bound, history fetch in flight.
    Loading,
    /// History applied, live feed being followed.
    Live,
    /// Subscription torn down, local sequence discarded.
    Closed,
}

/// An ordered, live-updating view of one conversation's messages for the
/// duration a chat view is open.
///
/// The local sequence starts as the history fetch result and grows by feed
/// delivery order from then on; there is no re-sort. One stream is driven by
/// one caller, so there is no internal locking. Streams for the same
/// conversation are fully independent of each other.
pub struct MessageStream {
    store: Arc<dyn ChatStore>,
    self_id: String,
    state: StreamState,
    conversation_id: Option<Uuid>,
    entries: Vec<ChatEntry>,
    /// Ids already in the sequence. The feed may replay events that the
    /// history fetch also returned, and it round-trips our own sends.
    seen: HashSet<Uuid>,
    subscription: Option<Subscription>,
}

impl MessageStream {
    pub fn new(store: Arc<dyn ChatStore>, self_id: impl Into<String>) -> Self {
        MessageStream {
            store,
            self_id: self_id.into(),
            state: StreamState::Idle,
            conversation_id: None,
            entries: Vec::new(),
            seen: HashSet::new(),
            subscription: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Identity of the locally authenticated participant.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    /// The local sequence, pending entries included.
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// Only the store-confirmed messages of the local sequence.
    pub fn confirmed(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(|e| match e {
            ChatEntry::Confirmed(m) => Some(m),
            ChatEntry::Pending(_) => None,
        })
    }

    /// Bind the stream to a conversation: load its history once and start
    /// following the live feed.
    ///
    /// The subscription is opened before the history fetch is issued, so an
    /// insert committed while the fetch is in flight waits in the channel;
    /// once history is applied those buffered events are replayed and
    /// deduplicated by id. A failed fetch leaves the stream Idle and
    /// unsubscribed, free to retry.
    pub async fn open(&mut self, conversation_id: Uuid) -> Result<(), ChatError> {
        if self.state != StreamState::Idle {
            return Err(ChatError::AlreadyOpen);
        }
        self.state = StreamState::Loading;
        self.conversation_id = Some(conversation_id);

        let mut subscription = self.store.subscribe(conversation_id);
        let history = match self.store.list_messages(conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                self.state = StreamState::Idle;
                self.conversation_id = None;
                return Err(ChatError::HistoryLoad(e));
            }
        };

        let history_len = history.len();
        for message in history {
            self.apply(message);
        }
        let buffered = subscription.drain();
        if !buffered.is_empty() {
            debug!("replaying {} event(s) buffered during history load", buffered.len());
        }
        for message in buffered {
            self.apply(message);
        }

        self.subscription = Some(subscription);
        self.state = StreamState::Live;
        info!(
            "stream live on conversation {} ({} historical message(s))",
            conversation_id, history_len
        );
        Ok(())
    }

    /// Wait for the next message on the live feed, append it, and return it.
    ///
    /// Returns `Ok(None)` when the stream is Closed or the feed has gone
    /// away; a Closed stream is never mutated.
    pub async fn next_message(&mut self) -> Result<Option<Message>, ChatError> {
        loop {
            match self.state {
                StreamState::Live => {}
                StreamState::Closed => return Ok(None),
                _ => return Err(ChatError::NotLive),
            }
            let received = match self.subscription.as_mut() {
                Some(subscription) => subscription.recv().await,
                None => return Ok(None),
            };
            match received {
                Some(message) => {
                    if self.apply(message.clone()) {
                        return Ok(Some(message));
                    }
                    // duplicate delivery, keep waiting
                }
                None => return Ok(None),
            }
        }
    }

    /// Append every already-delivered feed event without waiting. Returns
    /// how many entries were added. Suits callers polling from a UI tick.
    pub fn pump(&mut self) -> usize {
        if self.state != StreamState::Live {
            return 0;
        }
        let ready = match self.subscription.as_mut() {
            Some(subscription) => subscription.drain(),
            None => return 0,
        };
        ready.into_iter().filter(|m| self.apply(m.clone())).count()
    }

    /// Send a message to the bound conversation.
    ///
    /// The draft appears in the local sequence as a pending entry right
    /// away. On store success the entry becomes the confirmed record (the
    /// feed's round-trip of it is then a duplicate and gets skipped); on
    /// store failure the entry is removed and the error carries the draft
    /// back to the caller.
    pub async fn send(&mut self, body: &str) -> Result<Message, ChatError> {
        let content = body.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyBody);
        }
        let conversation_id = match (self.state, self.conversation_id) {
            (StreamState::Loading | StreamState::Live, Some(id)) => id,
            _ => return Err(ChatError::NotLive),
        };

        let pending = PendingMessage {
            local_id: Uuid::new_v4(),
            conversation_id,
            sender_id: self.self_id.clone(),
            content: content.to_owned(),
            queued_at: Utc::now(),
        };
        let local_id = pending.local_id;
        self.entries.push(ChatEntry::Pending(pending));

        match self
            .store
            .create_message(conversation_id, &self.self_id, content)
            .await
        {
            Ok(message) => {
                self.seen.insert(message.id);
                let slot = self.entries.iter().position(
                    |e| matches!(e, ChatEntry::Pending(p) if p.local_id == local_id),
                );
                match slot {
                    Some(i) => self.entries[i] = ChatEntry::Confirmed(message.clone()),
                    None => warn!("pending entry for {} disappeared before ack", message.id),
                }
                Ok(message)
            }
            Err(source) => {
                self.entries
                    .retain(|e| !matches!(e, ChatEntry::Pending(p) if p.local_id == local_id));
                Err(ChatError::Send {
                    draft: content.to_owned(),
                    source,
                })
            }
        }
    }

    /// Tear down the subscription and discard the local sequence. Terminal:
    /// later feed events and calls are no-ops.
    pub fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        // dropping the handle unsubscribes
        self.subscription = None;
        self.entries.clear();
        self.seen.clear();
        self.state = StreamState::Closed;
        if let Some(id) = self.conversation_id {
            info!("stream closed on conversation {}", id);
        }
    }

    /// Append a message unless its id is already in the sequence.
    fn apply(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            debug!("skipping duplicate delivery of message {}", message.id);
            return false;
        }
        self.entries.push(ChatEntry::Confirmed(message));
        true
    }
}
