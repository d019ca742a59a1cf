//! cargochat is the conversation/message synchronization core for the
//! cargo-space marketplace chat.
//!
//! Traders and logistics providers message each other about container
//! space. This crate is the piece every chat-capable client needs to get
//! right: resolving a participant pair to its single conversation, loading
//! ordered history once, and merging the live insert feed into it without
//! drops or duplicates.

pub mod chat;
pub mod models;
pub mod store;

// Re-export the main types for convenience
pub use chat::{ChatError, ChatSession, ConversationResolver, MessageStream, StreamState};
pub use models::{ChatEntry, Conversation, Message, PendingMessage};
pub use store::{ChatStore, MemoryStore, SqliteStore, StoreError, Subscription};
