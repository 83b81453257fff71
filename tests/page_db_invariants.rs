//! Page Database Invariant Tests
//!
//! Covers:
//! - Merge lookup is symmetric
//! - Object status only moves forward
//! - Commit generations never decrease
//! - Heads are listed in arrival order
//! - Sync bookkeeping and the online flag

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pagedb::kv::{KvOp, KvStore, MemoryKvStore};
use pagedb::{
    CommitId, CoroutineHandler, ObjectChunk, ObjectIdentifier, ObjectStatus, PageDb, PageDbBatch,
    PageDbErrorCode, SyncState,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn commit(seed: &str) -> CommitId {
    CommitId::for_storage_bytes(seed.as_bytes())
}

fn page() -> PageDb {
    PageDb::new(Arc::new(MemoryKvStore::new()))
}

// =============================================================================
// Merges
// =============================================================================

#[tokio::test]
async fn test_merge_lookup_is_order_independent() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let (p1, p2, m) = (commit("p1"), commit("p2"), commit("m"));

    let mut batch = db.start_batch();
    batch.add_merge(&handler, p1, p2, m).await.unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(db.get_merge(&handler, &p1, &p2).await.unwrap(), m);
    assert_eq!(db.get_merge(&handler, &p2, &p1).await.unwrap(), m);
    assert_eq!(
        db.get_merges_for_parent(&handler, &p2).await.unwrap(),
        vec![(p1, m)]
    );

    let missing = db
        .get_merge(&handler, &p1, &commit("other"))
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_merge_with_equal_parents_is_invalid() {
    let handler = CoroutineHandler::detached();
    let db = page();

    let mut batch = db.start_batch();
    let err = batch
        .add_merge(&handler, commit("p"), commit("p"), commit("m"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::InvalidArgument);
    assert_eq!(batch.pending_mutations(), 0);
}

#[tokio::test]
async fn test_merge_reinsertion() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let (p1, p2) = (commit("p1"), commit("p2"));

    let mut batch = db.start_batch();
    batch.add_merge(&handler, p1, p2, commit("m")).await.unwrap();
    batch.execute(&handler).await.unwrap();

    // Same merge id, reversed pair: idempotent
    let mut batch = db.start_batch();
    batch.add_merge(&handler, p2, p1, commit("m")).await.unwrap();
    assert_eq!(batch.pending_mutations(), 0);

    // Different merge id: consistency fault
    let err = batch
        .add_merge(&handler, p1, p2, commit("other merge"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::InternalConsistency);
    assert!(err.is_fatal());
}

// =============================================================================
// Commits
// =============================================================================

#[tokio::test]
async fn test_commit_bytes_round_trip_and_removal() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let id = commit("c1");

    let mut batch = db.start_batch();
    batch
        .add_commit_storage_bytes(&handler, id, b"serialized commit")
        .await
        .unwrap();
    batch.mark_commit_id_unsynced(&handler, id, 1).await.unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(
        db.get_commit_storage_bytes(&handler, &id).await.unwrap(),
        b"serialized commit"
    );

    let mut batch = db.start_batch();
    batch.remove_commit(&handler, id).await.unwrap();
    batch.execute(&handler).await.unwrap();

    let err = db.get_commit_storage_bytes(&handler, &id).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(db.get_unsynced_commit_ids(&handler).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_commit_bytes_are_invalid() {
    let handler = CoroutineHandler::detached();
    let db = page();

    let mut batch = db.start_batch();
    let err = batch
        .add_commit_storage_bytes(&handler, commit("c"), b"")
        .await
        .unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_remove_unknown_head_is_not_found() {
    let handler = CoroutineHandler::detached();
    let db = page();

    let mut batch = db.start_batch();
    let err = batch.remove_head(&handler, commit("x")).await.unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::NotFound);
}

#[tokio::test]
async fn test_heads_listed_by_arrival_time() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let early = Utc.timestamp_opt(100, 0).unwrap();
    let late = Utc.timestamp_opt(200, 0).unwrap();

    let mut batch = db.start_batch();
    batch.add_head(&handler, commit("late"), late).await.unwrap();
    batch.add_head(&handler, commit("early"), early).await.unwrap();
    batch.execute(&handler).await.unwrap();

    let heads = db.get_heads(&handler).await.unwrap();
    assert_eq!(heads, vec![(commit("early"), early), (commit("late"), late)]);
}

// =============================================================================
// Objects
// =============================================================================

#[tokio::test]
async fn test_object_status_moves_local_to_synced() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let content = b"piece of a page".to_vec();
    let chunk = ObjectChunk::new(content.clone());
    let id = chunk.identifier();

    let mut batch = db.start_batch();
    batch
        .write_object(&handler, chunk, ObjectStatus::Local)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(db.read_object(&handler, &id).await.unwrap(), content);
    assert_eq!(
        db.get_object_status(&handler, &id).await.unwrap(),
        ObjectStatus::Local
    );
    assert_eq!(db.get_unsynced_object_ids(&handler).await.unwrap(), vec![id]);

    let mut batch = db.start_batch();
    batch
        .set_object_status(&handler, id, ObjectStatus::Synced)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(db.read_object(&handler, &id).await.unwrap(), content);
    assert_eq!(
        db.get_object_status(&handler, &id).await.unwrap(),
        ObjectStatus::Synced
    );
    assert!(db.get_unsynced_object_ids(&handler).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_synced_object_is_never_demoted() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let chunk = ObjectChunk::new(b"synced".to_vec());
    let id = chunk.identifier();

    let mut batch = db.start_batch();
    batch
        .write_object(&handler, chunk.clone(), ObjectStatus::Synced)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    let mut batch = db.start_batch();
    batch
        .set_object_status(&handler, id, ObjectStatus::Local)
        .await
        .unwrap();
    batch
        .write_object(&handler, chunk, ObjectStatus::Local)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(
        db.get_object_status(&handler, &id).await.unwrap(),
        ObjectStatus::Synced
    );
}

#[tokio::test]
async fn test_set_status_of_unknown_object_is_not_found() {
    let handler = CoroutineHandler::detached();
    let db = page();

    let mut batch = db.start_batch();
    let err = batch
        .set_object_status(
            &handler,
            ObjectIdentifier::for_content(b"never written"),
            ObjectStatus::Synced,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::NotFound);
}

#[tokio::test]
async fn test_delete_object_returns_to_absent() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let chunk = ObjectChunk::new(b"garbage".to_vec());
    let id = chunk.identifier();

    let mut batch = db.start_batch();
    batch
        .write_object(&handler, chunk, ObjectStatus::Local)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    let mut batch = db.start_batch();
    batch.delete_object(&handler, id).await.unwrap();
    let again = batch.delete_object(&handler, id).await.unwrap_err();
    assert!(again.is_not_found());
    batch.execute(&handler).await.unwrap();

    assert!(!db.has_object(&handler, &id).await.unwrap());
}

#[tokio::test]
async fn test_corrupted_object_content_is_fatal() {
    let handler = CoroutineHandler::detached();
    let store = Arc::new(MemoryKvStore::new());
    let db = PageDb::new(store.clone());
    let chunk = ObjectChunk::new(b"original".to_vec());
    let id = chunk.identifier();

    let mut batch = db.start_batch();
    batch
        .write_object(&handler, chunk, ObjectStatus::Local)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    // Overwrite the content row behind the engine's back
    let content_key = store
        .scan_prefix(b"o/")
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .next()
        .unwrap();
    store
        .write_batch(vec![KvOp::put(content_key, b"tampered".to_vec())])
        .unwrap();

    let err = db.read_object(&handler, &id).await.unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::InternalConsistency);
    assert!(err.is_fatal());
}

// =============================================================================
// Commit sync state
// =============================================================================

#[tokio::test]
async fn test_unsynced_generation_never_decreases() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let id = commit("c");

    let mut batch = db.start_batch();
    batch.mark_commit_id_unsynced(&handler, id, 7).await.unwrap();
    batch.execute(&handler).await.unwrap();

    let mut batch = db.start_batch();
    batch.mark_commit_id_unsynced(&handler, id, 3).await.unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(
        db.get_commit_sync_state(&handler, &id).await.unwrap(),
        SyncState::Unsynced { generation: 7 }
    );

    let mut batch = db.start_batch();
    batch.mark_commit_id_unsynced(&handler, id, 9).await.unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(
        db.get_commit_sync_state(&handler, &id).await.unwrap(),
        SyncState::Unsynced { generation: 9 }
    );
    assert_eq!(db.get_page_generation(&handler).await.unwrap(), 9);
}

#[tokio::test]
async fn test_unsynced_commits_listed_in_generation_order() {
    let handler = CoroutineHandler::detached();
    let db = page();

    let mut batch = db.start_batch();
    batch
        .mark_commit_id_unsynced(&handler, commit("child"), 2)
        .await
        .unwrap();
    batch
        .mark_commit_id_unsynced(&handler, commit("grandchild"), 3)
        .await
        .unwrap();
    batch
        .mark_commit_id_unsynced(&handler, commit("root"), 1)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(
        db.get_unsynced_commit_ids(&handler).await.unwrap(),
        vec![commit("root"), commit("child"), commit("grandchild")]
    );

    let mut batch = db.start_batch();
    batch
        .mark_commit_id_synced(&handler, commit("root"))
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    assert!(db.is_commit_synced(&handler, &commit("root")).await.unwrap());
    assert!(!db.is_commit_synced(&handler, &commit("child")).await.unwrap());
    assert!(!db.is_commit_synced(&handler, &commit("unknown")).await.unwrap());
    assert_eq!(
        db.get_unsynced_commit_ids(&handler).await.unwrap(),
        vec![commit("child"), commit("grandchild")]
    );
}

#[tokio::test]
async fn test_synced_commit_ignores_unsynced_mark() {
    let handler = CoroutineHandler::detached();
    let db = page();
    let id = commit("uploaded");

    let mut batch = db.start_batch();
    batch.mark_commit_id_synced(&handler, id).await.unwrap();
    batch.execute(&handler).await.unwrap();

    let mut batch = db.start_batch();
    batch.mark_commit_id_unsynced(&handler, id, 5).await.unwrap();
    assert_eq!(batch.pending_mutations(), 0);
    batch.execute(&handler).await.unwrap();

    assert_eq!(
        db.get_commit_sync_state(&handler, &id).await.unwrap(),
        SyncState::Synced
    );
    assert_eq!(db.get_page_generation(&handler).await.unwrap(), 0);
    assert!(db.get_unsynced_commit_ids(&handler).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_largest_generation_is_rejected() {
    let handler = CoroutineHandler::detached();
    let db = page();

    let mut batch = db.start_batch();
    let err = batch
        .mark_commit_id_unsynced(&handler, commit("c"), u64::MAX)
        .await
        .unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::InvalidArgument);
    assert_eq!(batch.pending_mutations(), 0);

    batch
        .mark_commit_id_unsynced(&handler, commit("c"), u64::MAX - 1)
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(db.next_generation(&handler).await.unwrap(), u64::MAX);
}

#[tokio::test]
async fn test_exhausted_generation_counter_is_reported() {
    let handler = CoroutineHandler::detached();
    let store = Arc::new(MemoryKvStore::new());
    let db = PageDb::new(store.clone());
    store
        .write_batch(vec![KvOp::put(b"g".to_vec(), u64::MAX.to_be_bytes().to_vec())])
        .unwrap();

    assert_eq!(db.get_page_generation(&handler).await.unwrap(), u64::MAX);
    let err = db.next_generation(&handler).await.unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::InternalConsistency);
}

#[tokio::test]
async fn test_failed_unsynced_mark_queues_nothing() {
    let handler = CoroutineHandler::detached();
    let store = Arc::new(MemoryKvStore::new());
    let db = PageDb::new(store.clone());
    store
        .write_batch(vec![KvOp::put(b"g".to_vec(), b"bad".to_vec())])
        .unwrap();

    let mut batch = db.start_batch();
    let err = batch
        .mark_commit_id_unsynced(&handler, commit("c"), 7)
        .await
        .unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::InternalConsistency);
    assert_eq!(batch.pending_mutations(), 0);

    batch.execute(&handler).await.unwrap();
    let missing = db
        .get_commit_sync_state(&handler, &commit("c"))
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_next_generation_starts_at_one() {
    let handler = CoroutineHandler::detached();
    let db = page();
    assert_eq!(db.get_page_generation(&handler).await.unwrap(), 0);
    assert_eq!(db.next_generation(&handler).await.unwrap(), 1);
}

// =============================================================================
// Sync metadata and online flag
// =============================================================================

#[tokio::test]
async fn test_sync_metadata_overwrite() {
    let handler = CoroutineHandler::detached();
    let db = page();

    let missing = db.get_sync_metadata(&handler, "timestamp").await.unwrap_err();
    assert!(missing.is_not_found());

    let mut batch = db.start_batch();
    batch
        .set_sync_metadata(&handler, "timestamp", b"old")
        .await
        .unwrap();
    batch
        .set_sync_metadata(&handler, "timestamp", b"new")
        .await
        .unwrap();
    batch.execute(&handler).await.unwrap();

    assert_eq!(
        db.get_sync_metadata(&handler, "timestamp").await.unwrap(),
        b"new"
    );
}

#[tokio::test]
async fn test_mark_page_online_is_idempotent() {
    let handler = CoroutineHandler::detached();
    let db = page();
    assert!(!db.is_page_online(&handler).await.unwrap());

    for _ in 0..2 {
        let mut batch = db.start_batch();
        batch.mark_page_online(&handler).await.unwrap();
        batch.mark_page_online(&handler).await.unwrap();
        batch.execute(&handler).await.unwrap();
        assert!(db.is_page_online(&handler).await.unwrap());
    }
}

#[tokio::test]
async fn test_reads_fail_on_interrupted_handler() {
    let db = page();
    let (handler, interrupter) = CoroutineHandler::new();
    interrupter.interrupt();

    let err = db.get_heads(&handler).await.unwrap_err();
    assert_eq!(err.code(), PageDbErrorCode::Interrupted);
    assert_eq!(db.metrics().snapshot().reads_interrupted, 1);
}
