// Chat core: conversation resolution and live message streams.
//
// The pieces compose the way the marketplace chat screen uses them: the
// resolver turns (me, peer) into the one conversation between them, a
// message stream loads that conversation's history and follows its live
// feed, and a session wires the two together for one open chat view.

use thiserror::Error;

use crate::store::StoreError;

pub mod resolver;
pub mod session;
pub mod stream;

pub use resolver::ConversationResolver;
pub use session::ChatSession;
pub use stream::{MessageStream, StreamState};

/// Errors raised by the chat core. Each failure is local to the operation
/// that raised it; there is no retry or backoff at this layer.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The find-or-create sequence failed; the chat view must not open.
    #[error("failed to resolve conversation: {0}")]
    Resolution(#[source] StoreError),

    /// The history fetch failed; the stream did not go live.
    #[error("failed to load message history: {0}")]
    HistoryLoad(#[source] StoreError),

    /// The store rejected the insert. The trimmed draft rides along so the
    /// caller can put it back in the input instead of losing it.
    #[error("failed to send message: {source}")]
    Send {
        draft: String,
        #[source]
        source: StoreError,
    },

    /// A participant identity was empty.
    #[error("participant identity must not be empty")]
    EmptyParticipant,

    /// Both sides of the pair were the same participant.
    #[error("cannot open a conversation of {0} with themselves")]
    SelfConversation(String),

    /// The message body was empty after trimming.
    #[error("message body must not be empty")]
    EmptyBody,

    /// The stream is not bound to a conversation (Idle or Closed).
    #[error("message stream is not live")]
    NotLive,

    /// The stream was already bound to a conversation.
    #[error("message stream is already open")]
    AlreadyOpen,
}
