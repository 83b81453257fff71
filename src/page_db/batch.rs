//! Write side of the page database
//!
//! A [`Batch`] buffers mutations in an ordered overlay (key -> put/delete,
//! last write per key wins) and hands the whole overlay to the store as one
//! atomic `write_batch` on [`PageDbBatch::execute`].
//!
//! Mutations that must validate against existing rows consult the overlay
//! first and fall back to the last durably committed state, so a batch sees
//! its own pending writes.
//!
//! # Lifecycle
//!
//! - A batch is owned by one task from `start_batch` until `execute` returns
//! - `execute` is the only point where the batch writes to the store
//! - After `execute` returns, with any outcome, every call on the batch fails
//!   with `PAGEDB_BATCH_ALREADY_EXECUTED`

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::db::{corrupt_row, decode_object_status, PageDb};
use super::errors::{PageDbError, PageDbResult};
use super::keys;
use super::types::{CommitId, ObjectChunk, ObjectIdentifier, ObjectStatus, SyncState};
use crate::coroutine::CoroutineHandler;
use crate::kv::KvOp;
use crate::observability::{log_event_with_fields, Event, Logger};

/// Mutations a page storage batch accepts.
///
/// Every method may suspend on store I/O and takes the caller's
/// [`CoroutineHandler`]; an interrupted handler fails the call with
/// `PAGEDB_INTERRUPTED`.
#[allow(async_fn_in_trait)]
pub trait PageDbBatch {
    /// Records `head` as a head. No-op if it already is one.
    async fn add_head(
        &mut self,
        handler: &CoroutineHandler,
        head: CommitId,
        timestamp: DateTime<Utc>,
    ) -> PageDbResult<()>;

    /// Removes `head` from the head set. NotFound if it is not a head.
    async fn remove_head(&mut self, handler: &CoroutineHandler, head: CommitId)
        -> PageDbResult<()>;

    /// Records `merge` as the merge of the unordered pair of parents.
    async fn add_merge(
        &mut self,
        handler: &CoroutineHandler,
        parent1: CommitId,
        parent2: CommitId,
        merge: CommitId,
    ) -> PageDbResult<()>;

    async fn add_commit_storage_bytes(
        &mut self,
        handler: &CoroutineHandler,
        commit_id: CommitId,
        storage_bytes: &[u8],
    ) -> PageDbResult<()>;

    /// Removes commit bytes and sync state. References from heads or merges
    /// are not checked.
    async fn remove_commit(
        &mut self,
        handler: &CoroutineHandler,
        commit_id: CommitId,
    ) -> PageDbResult<()>;

    async fn write_object(
        &mut self,
        handler: &CoroutineHandler,
        chunk: ObjectChunk,
        status: ObjectStatus,
    ) -> PageDbResult<()>;

    /// Raises the status of an existing object. Lower statuses are ignored.
    async fn set_object_status(
        &mut self,
        handler: &CoroutineHandler,
        object_id: ObjectIdentifier,
        status: ObjectStatus,
    ) -> PageDbResult<()>;

    /// Removes an object entirely. Whether it is still referenced is the
    /// caller's concern.
    async fn delete_object(
        &mut self,
        handler: &CoroutineHandler,
        object_id: ObjectIdentifier,
    ) -> PageDbResult<()>;

    async fn mark_commit_id_synced(
        &mut self,
        handler: &CoroutineHandler,
        commit_id: CommitId,
    ) -> PageDbResult<()>;

    /// Keeps the larger of the stored and the given generation.
    /// `u64::MAX` is rejected so the page always has a next generation.
    async fn mark_commit_id_unsynced(
        &mut self,
        handler: &CoroutineHandler,
        commit_id: CommitId,
        generation: u64,
    ) -> PageDbResult<()>;

    async fn set_sync_metadata(
        &mut self,
        handler: &CoroutineHandler,
        key: &str,
        value: &[u8],
    ) -> PageDbResult<()>;

    async fn mark_page_online(&mut self, handler: &CoroutineHandler) -> PageDbResult<()>;

    /// Atomically applies every queued mutation.
    async fn execute(&mut self, handler: &CoroutineHandler) -> PageDbResult<()>;
}

/// Pending mutations of one page, applied as one store transaction.
#[derive(Debug)]
pub struct Batch {
    id: Uuid,
    db: PageDb,
    /// `None` marks a pending delete.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    objects_written: u64,
    executed: bool,
}

impl Batch {
    pub(crate) fn new(db: PageDb) -> Self {
        Self {
            id: Uuid::new_v4(),
            db,
            pending: BTreeMap::new(),
            objects_written: 0,
            executed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of distinct keys this batch will write.
    pub fn pending_mutations(&self) -> usize {
        self.pending.len()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    fn ensure_open(&self) -> PageDbResult<()> {
        if self.executed {
            let id = self.id.to_string();
            log_event_with_fields(Event::BatchReused, &[("batch_id", &id)]);
            return Err(PageDbError::batch_already_executed(id));
        }
        Ok(())
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Current value of `key` as this batch sees it.
    async fn lookup(
        &self,
        handler: &CoroutineHandler,
        key: &[u8],
    ) -> PageDbResult<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.db.get(handler, key.to_vec()).await,
        }
    }

    async fn lookup_object_status(
        &self,
        handler: &CoroutineHandler,
        object_id: &ObjectIdentifier,
    ) -> PageDbResult<Option<ObjectStatus>> {
        let key = keys::object_status_key(object_id);
        match self.lookup(handler, &key).await? {
            Some(value) => decode_object_status(&key, &value).map(Some),
            None => Ok(None),
        }
    }

    fn into_ops(pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> (Vec<KvOp>, u64) {
        let mut bytes = 0u64;
        let ops = pending
            .into_iter()
            .map(|(key, value)| {
                bytes += key.len() as u64;
                match value {
                    Some(value) => {
                        bytes += value.len() as u64;
                        KvOp::Put { key, value }
                    }
                    None => KvOp::Delete { key },
                }
            })
            .collect();
        (ops, bytes)
    }
}

impl PageDbBatch for Batch {
    async fn add_head(
        &mut self,
        handler: &CoroutineHandler,
        head: CommitId,
        timestamp: DateTime<Utc>,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        let key = keys::head_key(&head);
        if self.lookup(handler, &key).await?.is_none() {
            self.put(key, keys::encode_i64(timestamp.timestamp_micros()));
        }
        Ok(())
    }

    async fn remove_head(
        &mut self,
        handler: &CoroutineHandler,
        head: CommitId,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        let key = keys::head_key(&head);
        if self.lookup(handler, &key).await?.is_none() {
            return Err(PageDbError::not_found(format!("head {}", head)));
        }
        self.delete(key);
        Ok(())
    }

    async fn add_merge(
        &mut self,
        handler: &CoroutineHandler,
        parent1: CommitId,
        parent2: CommitId,
        merge: CommitId,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        if parent1 == parent2 {
            return Err(PageDbError::invalid_argument(format!(
                "merge parents must differ, got {} twice",
                parent1
            )));
        }

        let key = keys::merge_key(&parent1, &parent2);
        match self.lookup(handler, &key).await? {
            Some(existing) => {
                let existing =
                    CommitId::from_slice(&existing).ok_or_else(|| corrupt_row("merge id", &key))?;
                if existing != merge {
                    let (existing, merge) = (existing.to_string(), merge.to_string());
                    log_event_with_fields(
                        Event::MergeConflict,
                        &[("existing", &existing), ("incoming", &merge)],
                    );
                    return Err(PageDbError::internal_consistency(
                        "Parent pair already merged into a different commit",
                    )
                    .with_details(format!("existing: {}, incoming: {}", existing, merge)));
                }
            }
            None => self.put(key, merge.as_bytes().to_vec()),
        }
        Ok(())
    }

    async fn add_commit_storage_bytes(
        &mut self,
        _handler: &CoroutineHandler,
        commit_id: CommitId,
        storage_bytes: &[u8],
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        if storage_bytes.is_empty() {
            return Err(PageDbError::invalid_argument(format!(
                "empty storage bytes for commit {}",
                commit_id
            )));
        }
        self.put(keys::commit_key(&commit_id), storage_bytes.to_vec());
        Ok(())
    }

    async fn remove_commit(
        &mut self,
        _handler: &CoroutineHandler,
        commit_id: CommitId,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        self.delete(keys::commit_key(&commit_id));
        self.delete(keys::commit_sync_key(&commit_id));
        Ok(())
    }

    async fn write_object(
        &mut self,
        handler: &CoroutineHandler,
        chunk: ObjectChunk,
        status: ObjectStatus,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        let object_id = chunk.identifier();

        match self.lookup_object_status(handler, &object_id).await? {
            // Same identifier means same content; only the status can move.
            Some(existing) => {
                if status > existing {
                    self.put(keys::object_status_key(&object_id), vec![status.as_byte()]);
                }
            }
            None => {
                self.put(keys::object_key(&object_id), chunk.into_content());
                self.put(keys::object_status_key(&object_id), vec![status.as_byte()]);
                self.objects_written += 1;
            }
        }
        Ok(())
    }

    async fn set_object_status(
        &mut self,
        handler: &CoroutineHandler,
        object_id: ObjectIdentifier,
        status: ObjectStatus,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        let existing = self
            .lookup_object_status(handler, &object_id)
            .await?
            .ok_or_else(|| PageDbError::not_found(format!("object {}", object_id)))?;

        if status > existing {
            self.put(keys::object_status_key(&object_id), vec![status.as_byte()]);
        }
        Ok(())
    }

    async fn delete_object(
        &mut self,
        handler: &CoroutineHandler,
        object_id: ObjectIdentifier,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        if self.lookup_object_status(handler, &object_id).await?.is_none() {
            return Err(PageDbError::not_found(format!("object {}", object_id)));
        }
        self.delete(keys::object_key(&object_id));
        self.delete(keys::object_status_key(&object_id));
        Ok(())
    }

    async fn mark_commit_id_synced(
        &mut self,
        _handler: &CoroutineHandler,
        commit_id: CommitId,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        self.put(keys::commit_sync_key(&commit_id), SyncState::Synced.encode());
        Ok(())
    }

    async fn mark_commit_id_unsynced(
        &mut self,
        handler: &CoroutineHandler,
        commit_id: CommitId,
        generation: u64,
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        if generation == u64::MAX {
            return Err(PageDbError::invalid_argument(format!(
                "generation {} leaves no successor for commit {}",
                generation, commit_id
            )));
        }

        let key = keys::commit_sync_key(&commit_id);
        let counter_key = keys::PAGE_GENERATION_KEY;

        // Both rows are read before either is queued, so a failed call leaves
        // the overlay untouched.
        let stored = match self.lookup(handler, &key).await? {
            Some(value) => Some(
                SyncState::decode(&value).ok_or_else(|| corrupt_row("commit sync state", &key))?,
            ),
            None => None,
        };
        let current = match self.lookup(handler, counter_key).await? {
            Some(value) => keys::decode_u64(&value)
                .ok_or_else(|| corrupt_row("page generation", counter_key))?,
            None => 0,
        };

        let generation = match stored {
            // Synced is terminal for a commit
            Some(SyncState::Synced) => return Ok(()),
            Some(SyncState::Unsynced { generation: stored }) => stored.max(generation),
            None => generation,
        };

        self.put(key, SyncState::Unsynced { generation }.encode());
        if generation > current {
            self.put(counter_key.to_vec(), keys::encode_u64(generation));
        }
        Ok(())
    }

    async fn set_sync_metadata(
        &mut self,
        _handler: &CoroutineHandler,
        key: &str,
        value: &[u8],
    ) -> PageDbResult<()> {
        self.ensure_open()?;
        self.put(keys::sync_metadata_key(key), value.to_vec());
        Ok(())
    }

    async fn mark_page_online(&mut self, _handler: &CoroutineHandler) -> PageDbResult<()> {
        self.ensure_open()?;
        self.put(keys::PAGE_ONLINE_KEY.to_vec(), vec![1]);
        Ok(())
    }

    async fn execute(&mut self, handler: &CoroutineHandler) -> PageDbResult<()> {
        self.ensure_open()?;
        self.executed = true;

        if self.pending.is_empty() {
            return Ok(());
        }

        let batch_id = self.id.to_string();
        let marks_online = self.pending.contains_key(keys::PAGE_ONLINE_KEY);
        let (ops, bytes) = Self::into_ops(std::mem::take(&mut self.pending));
        let mutations = ops.len() as u64;
        let mutations_field = mutations.to_string();

        Logger::trace(
            Event::BatchExecuteBegin.as_str(),
            &[("batch_id", &batch_id), ("mutations", &mutations_field)],
        );

        let store = Arc::clone(self.db.store());
        let metrics = self.db.metrics();
        match handler.run(move || store.write_batch(ops)).await {
            Ok(Ok(())) => {
                metrics.record_batch_committed(mutations, bytes);
                metrics.add_objects_written(self.objects_written);
                Logger::trace(
                    Event::BatchCommitted.as_str(),
                    &[("batch_id", &batch_id), ("mutations", &mutations_field)],
                );
                if marks_online {
                    Logger::trace(Event::PageMarkedOnline.as_str(), &[("batch_id", &batch_id)]);
                }
                Ok(())
            }
            Ok(Err(e)) => {
                metrics.increment_batches_failed();
                let reason = e.to_string();
                Logger::error(
                    Event::BatchFailed.as_str(),
                    &[("batch_id", &batch_id), ("reason", &reason)],
                );
                Err(self
                    .db
                    .store_failure("execute", e)
                    .with_details(format!("batch_id: {}", batch_id)))
            }
            Err(_) => {
                metrics.increment_batches_interrupted();
                Logger::warn(Event::BatchInterrupted.as_str(), &[("batch_id", &batch_id)]);
                Err(PageDbError::interrupted("batch execute interrupted")
                    .with_details(format!("batch_id: {}", batch_id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn page() -> PageDb {
        PageDb::new(Arc::new(MemoryKvStore::new()))
    }

    fn commit(seed: &str) -> CommitId {
        CommitId::for_storage_bytes(seed.as_bytes())
    }

    #[tokio::test]
    async fn test_lookup_sees_pending_writes() {
        let handler = CoroutineHandler::detached();
        let db = page();
        let mut batch = db.start_batch();

        batch.add_head(&handler, commit("a"), Utc::now()).await.unwrap();
        // The head only exists in the overlay, removal still finds it
        batch.remove_head(&handler, commit("a")).await.unwrap();
        assert_eq!(batch.pending_mutations(), 1);

        let err = batch.remove_head(&handler, commit("a")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_store() {
        let handler = CoroutineHandler::detached();
        let store = Arc::new(MemoryKvStore::new());
        let db = PageDb::new(store.clone());

        let mut batch = db.start_batch();
        batch.execute(&handler).await.unwrap();

        assert!(batch.is_executed());
        assert_eq!(store.batches_applied(), 0);
    }

    #[tokio::test]
    async fn test_rewriting_object_keeps_single_content_write() {
        let handler = CoroutineHandler::detached();
        let db = page();
        let mut batch = db.start_batch();
        let chunk = ObjectChunk::new(b"chunk".to_vec());

        batch
            .write_object(&handler, chunk.clone(), ObjectStatus::Local)
            .await
            .unwrap();
        batch
            .write_object(&handler, chunk, ObjectStatus::Local)
            .await
            .unwrap();

        assert_eq!(batch.pending_mutations(), 2);
        assert_eq!(batch.objects_written, 1);
    }

    #[tokio::test]
    async fn test_generation_counter_tracks_maximum() {
        let handler = CoroutineHandler::detached();
        let db = page();
        let mut batch = db.start_batch();

        batch
            .mark_commit_id_unsynced(&handler, commit("a"), 4)
            .await
            .unwrap();
        batch
            .mark_commit_id_unsynced(&handler, commit("b"), 2)
            .await
            .unwrap();
        batch.execute(&handler).await.unwrap();

        assert_eq!(db.get_page_generation(&handler).await.unwrap(), 4);
        assert_eq!(db.next_generation(&handler).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_interrupted_handler_rejects_validating_calls() {
        let (handler, interrupter) = CoroutineHandler::new();
        let db = page();
        let mut batch = db.start_batch();
        interrupter.interrupt();

        let err = batch
            .add_head(&handler, commit("a"), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_interrupted());
        assert_eq!(batch.pending_mutations(), 0);
    }
}
