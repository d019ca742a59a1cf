// Common test utilities for the integration tests.
//
// Shared fixtures plus a few store wrappers that force the timing windows
// the chat core has to survive: a message committed while the history fetch
// is in flight, a conversation creation race lost to the peer, and a store
// that rejects inserts.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::LevelFilter;
use tokio::time::timeout;
use uuid::Uuid;

use cargochat::{
    ChatStore, Conversation, MemoryStore, Message, MessageStream, SqliteStore, StoreError,
    Subscription,
};

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub fn mem_store() -> Arc<MemoryStore> {
    setup_logging();
    Arc::new(MemoryStore::new())
}

/// SQLite store backed by a throwaway database file. The TempDir must stay
/// alive as long as the store does.
pub async fn sqlite_store() -> Result<(Arc<SqliteStore>, tempfile::TempDir)> {
    setup_logging();
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("chat.db").display());
    let store = SqliteStore::connect(&url).await?;
    Ok((Arc::new(store), dir))
}

/// Wait for the next live message on a stream, bounded by a timeout.
pub async fn wait_for_message(stream: &mut MessageStream, timeout_secs: u64) -> Result<Message> {
    match timeout(Duration::from_secs(timeout_secs), stream.next_message()).await {
        Ok(Ok(Some(message))) => Ok(message),
        Ok(Ok(None)) => Err(anyhow!("live feed ended")),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(anyhow!("timed out waiting for message")),
    }
}

/// Delegating store that commits one extra message the moment the history
/// fetch runs, after the subscription already exists. Reproduces the
/// load/subscribe race: the same message arrives both in the history result
/// and on the live feed.
pub struct MidLoadInsertStore {
    inner: Arc<MemoryStore>,
    sender: String,
    content: String,
    fired: AtomicBool,
}

impl MidLoadInsertStore {
    pub fn new(inner: Arc<MemoryStore>, sender: &str, content: &str) -> Self {
        MidLoadInsertStore {
            inner,
            sender: sender.to_string(),
            content: content.to_string(),
            fired: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChatStore for MidLoadInsertStore {
    async fn find_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        self.inner.find_conversation(a, b).await
    }

    async fn create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError> {
        self.inner.create_conversation(a, b).await
    }

    async fn list_conversations(
        &self,
        participant: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        self.inner.list_conversations(participant).await
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            // Committed while the caller's fetch is "in flight": it will be
            // part of the history result and of the buffered feed.
            self.inner
                .create_message(conversation_id, &self.sender, &self.content)
                .await?;
        }
        self.inner.list_messages(conversation_id).await
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.inner.create_message(conversation_id, sender, content).await
    }

    fn subscribe(&self, conversation_id: Uuid) -> Subscription {
        self.inner.subscribe(conversation_id)
    }
}

/// Delegating store whose first pair lookup comes back empty even though the
/// row exists. Forces the resolver down the create path so it loses the
/// creation race and has to heal by re-querying.
pub struct StaleFindStore {
    inner: Arc<MemoryStore>,
    miss_next: AtomicBool,
}

impl StaleFindStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        StaleFindStore {
            inner,
            miss_next: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ChatStore for StaleFindStore {
    async fn find_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        if self.miss_next.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_conversation(a, b).await
    }

    async fn create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError> {
        self.inner.create_conversation(a, b).await
    }

    async fn list_conversations(
        &self,
        participant: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        self.inner.list_conversations(participant).await
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.inner.list_messages(conversation_id).await
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.inner.create_message(conversation_id, sender, content).await
    }

    fn subscribe(&self, conversation_id: Uuid) -> Subscription {
        self.inner.subscribe(conversation_id)
    }
}

/// Delegating store that rejects every message insert.
pub struct RejectingSendStore {
    inner: Arc<MemoryStore>,
}

impl RejectingSendStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        RejectingSendStore { inner }
    }
}

#[async_trait]
impl ChatStore for RejectingSendStore {
    async fn find_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        self.inner.find_conversation(a, b).await
    }

    async fn create_conversation(&self, a: &str, b: &str) -> Result<Conversation, StoreError> {
        self.inner.create_conversation(a, b).await
    }

    async fn list_conversations(
        &self,
        participant: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        self.inner.list_conversations(participant).await
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.inner.list_messages(conversation_id).await
    }

    async fn create_message(
        &self,
        _conversation_id: Uuid,
        _sender: &str,
        _content: &str,
    ) -> Result<Message, StoreError> {
        Err(StoreError::Unavailable("insert rejected by test store".to_string()))
    }

    fn subscribe(&self, conversation_id: Uuid) -> Subscription {
        self.inner.subscribe(conversation_id)
    }
}
