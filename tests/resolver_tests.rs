// Integration tests for conversation resolution: pair stability, order
// symmetry, input validation, and healing a lost creation race.

mod common;

use std::sync::Arc;

use cargochat::{ChatError, ChatStore, ConversationResolver, StoreError};
use common::{mem_store, setup_logging, StaleFindStore};

#[tokio::test]
async fn test_sequential_resolve_returns_same_conversation() {
    let store = mem_store();
    let resolver = ConversationResolver::new(store.clone());

    let first = resolver.resolve("trader-1", "provider-9").await.unwrap();
    let second = resolver.resolve("trader-1", "provider-9").await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(first.has_participant("trader-1"));
    assert!(first.has_participant("provider-9"));
}

#[tokio::test]
async fn test_resolve_is_order_symmetric() {
    let store = mem_store();
    let resolver = ConversationResolver::new(store.clone());

    let forward = resolver.resolve("trader-1", "provider-9").await.unwrap();
    let reverse = resolver.resolve("provider-9", "trader-1").await.unwrap();

    assert_eq!(forward.id, reverse.id);
}

#[tokio::test]
async fn test_resolve_rejects_bad_input() {
    let store = mem_store();
    let resolver = ConversationResolver::new(store);

    assert!(matches!(
        resolver.resolve("", "provider-9").await,
        Err(ChatError::EmptyParticipant)
    ));
    assert!(matches!(
        resolver.resolve("trader-1", "  ").await,
        Err(ChatError::EmptyParticipant)
    ));
    assert!(matches!(
        resolver.resolve("trader-1", "trader-1").await,
        Err(ChatError::SelfConversation(_))
    ));
}

#[tokio::test]
async fn test_lost_creation_race_heals_to_existing_row() {
    setup_logging();
    let inner = mem_store();

    // The peer's client already created the thread.
    let winner = inner
        .create_conversation("provider-9", "trader-1")
        .await
        .unwrap();

    // Our first lookup misses (stale read), so we go down the create path,
    // hit the uniqueness constraint, and must end up on the winner's row.
    let resolver = ConversationResolver::new(Arc::new(StaleFindStore::new(inner)));
    let resolved = resolver.resolve("trader-1", "provider-9").await.unwrap();

    assert_eq!(resolved.id, winner.id);
}

#[tokio::test]
async fn test_store_rejects_second_conversation_for_pair() {
    let store = mem_store();

    store
        .create_conversation("trader-1", "provider-9")
        .await
        .unwrap();
    let err = store
        .create_conversation("provider-9", "trader-1")
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::PairConflict(..)));
}

#[tokio::test]
async fn test_conversation_listing_orders_by_activity() {
    let store = mem_store();
    let resolver = ConversationResolver::new(store.clone());

    let with_provider = resolver.resolve("trader-1", "provider-9").await.unwrap();
    let with_other = resolver.resolve("trader-1", "provider-2").await.unwrap();

    // Messaging the older thread makes it the most recently active.
    store
        .create_message(with_provider.id, "trader-1", "Still have space on the Rotterdam leg?")
        .await
        .unwrap();

    let listed = resolver.conversations("trader-1").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, with_provider.id);
    assert_eq!(listed[1].id, with_other.id);

    // The peer only sees the thread they are part of.
    let peer_listed = resolver.conversations("provider-2").await.unwrap();
    assert_eq!(peer_listed.len(), 1);
    assert_eq!(peer_listed[0].id, with_other.id);
}
