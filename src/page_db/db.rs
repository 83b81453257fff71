//! Read side of the page database
//!
//! Every read goes straight to the store and therefore observes exactly the
//! batches whose `execute` has completed. Stored rows are decoded and
//! validated on the way out; a row that does not decode is corruption.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::batch::Batch;
use super::errors::{PageDbError, PageDbResult};
use super::keys::{self, COMMIT_SYNC_PREFIX, HEADS_PREFIX, OBJECT_STATUS_PREFIX};
use super::types::{CommitId, ObjectIdentifier, ObjectStatus, SyncState};
use crate::config::{PageDbConfig, StoreBackend};
use crate::coroutine::CoroutineHandler;
use crate::kv::{KvError, KvResult, KvStore, LogKvStore, MemoryKvStore};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Handle to the storage of one page. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PageDb {
    store: Arc<dyn KvStore>,
    metrics: Arc<MetricsRegistry>,
}

impl PageDb {
    /// Wraps an already opened store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Opens the store described by `config`.
    ///
    /// For the log backend this replays the batch log; a corrupted log
    /// fails the open with an internal consistency error.
    ///
    /// The log level is process-wide and is left alone here; the process
    /// applies it once with [`PageDbConfig::apply_log_level`].
    pub fn open(config: &PageDbConfig) -> PageDbResult<Self> {
        config
            .validate()
            .map_err(|e| PageDbError::invalid_argument(e.to_string()))?;

        let (store, replayed): (Arc<dyn KvStore>, u64) = match config.backend {
            StoreBackend::Memory => (Arc::new(MemoryKvStore::new()), 0),
            StoreBackend::Log => {
                let data_dir = config.data_dir.as_deref().ok_or_else(|| {
                    PageDbError::invalid_argument("data_dir is required for the log backend")
                })?;
                let store = LogKvStore::open(data_dir, config.sync_on_write()).map_err(|e| {
                    if e.is_corruption() {
                        log_event_with_fields(
                            Event::StoreCorruption,
                            &[("data_dir", &data_dir.display().to_string())],
                        );
                    }
                    PageDbError::from_kv("Failed to open batch log", e)
                })?;
                let replayed = store.replayed_records();
                log_event_with_fields(
                    Event::StoreReplayComplete,
                    &[("records", &replayed.to_string())],
                );
                (Arc::new(store), replayed)
            }
        };

        let db = Self::new(store);
        db.metrics.set_replayed_records(replayed);
        log_event_with_fields(
            Event::PageDbOpened,
            &[("backend", &format!("{:?}", config.backend).to_lowercase())],
        );
        Ok(db)
    }

    /// Starts a new batch bound to this page.
    pub fn start_batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Runs one store read on behalf of `handler`.
    async fn run<T, F>(&self, handler: &CoroutineHandler, what: &str, work: F) -> PageDbResult<T>
    where
        F: FnOnce() -> KvResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.metrics.increment_reads();
        match handler.run(work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.store_failure(what, e)),
            Err(_) => {
                self.metrics.increment_reads_interrupted();
                Err(PageDbError::interrupted(format!("{} interrupted", what)))
            }
        }
    }

    pub(crate) fn store_failure(&self, what: &str, error: KvError) -> PageDbError {
        if error.is_corruption() {
            log_event_with_fields(Event::StoreCorruption, &[("operation", what)]);
        }
        PageDbError::from_kv(format!("{} failed", what), error)
    }

    pub(crate) async fn get(
        &self,
        handler: &CoroutineHandler,
        key: Vec<u8>,
    ) -> PageDbResult<Option<Vec<u8>>> {
        let store = Arc::clone(&self.store);
        self.run(handler, "get", move || store.get(&key)).await
    }

    async fn scan(
        &self,
        handler: &CoroutineHandler,
        prefix: &'static [u8],
    ) -> PageDbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let store = Arc::clone(&self.store);
        self.run(handler, "scan", move || store.scan_prefix(prefix)).await
    }

    async fn get_required(
        &self,
        handler: &CoroutineHandler,
        key: Vec<u8>,
        what: impl FnOnce() -> String,
    ) -> PageDbResult<Vec<u8>> {
        self.get(handler, key)
            .await?
            .ok_or_else(|| PageDbError::not_found(what()))
    }

    // Heads

    /// Current heads, oldest arrival first. Equal timestamps order by id.
    pub async fn get_heads(
        &self,
        handler: &CoroutineHandler,
    ) -> PageDbResult<Vec<(CommitId, DateTime<Utc>)>> {
        let rows = self.scan(handler, HEADS_PREFIX).await?;
        let mut heads = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let commit_id = keys::commit_id_from_key(HEADS_PREFIX, &key)
                .ok_or_else(|| corrupt_row("head key", &key))?;
            let timestamp = keys::decode_i64(&value)
                .and_then(DateTime::<Utc>::from_timestamp_micros)
                .ok_or_else(|| corrupt_row("head timestamp", &key))?;
            heads.push((commit_id, timestamp));
        }
        heads.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        Ok(heads)
    }

    // Commits

    pub async fn get_commit_storage_bytes(
        &self,
        handler: &CoroutineHandler,
        commit_id: &CommitId,
    ) -> PageDbResult<Vec<u8>> {
        self.get_required(handler, keys::commit_key(commit_id), || {
            format!("commit {}", commit_id)
        })
        .await
    }

    pub async fn has_commit(
        &self,
        handler: &CoroutineHandler,
        commit_id: &CommitId,
    ) -> PageDbResult<bool> {
        Ok(self
            .get(handler, keys::commit_key(commit_id))
            .await?
            .is_some())
    }

    // Merges

    /// The merge of `parent1` and `parent2`, in either order.
    pub async fn get_merge(
        &self,
        handler: &CoroutineHandler,
        parent1: &CommitId,
        parent2: &CommitId,
    ) -> PageDbResult<CommitId> {
        let key = keys::merge_key(parent1, parent2);
        let value = self
            .get_required(handler, key.clone(), || {
                format!("merge of {} and {}", parent1, parent2)
            })
            .await?;
        CommitId::from_slice(&value).ok_or_else(|| corrupt_row("merge id", &key))
    }

    /// Every recorded merge with `parent` on either side, as
    /// `(other parent, merge)`.
    pub async fn get_merges_for_parent(
        &self,
        handler: &CoroutineHandler,
        parent: &CommitId,
    ) -> PageDbResult<Vec<(CommitId, CommitId)>> {
        let rows = self.scan(handler, keys::MERGES_PREFIX).await?;
        let mut merges = Vec::new();
        for (key, value) in rows {
            let (low, high) =
                keys::parents_from_merge_key(&key).ok_or_else(|| corrupt_row("merge key", &key))?;
            let other = if low == *parent {
                high
            } else if high == *parent {
                low
            } else {
                continue;
            };
            let merge = CommitId::from_slice(&value).ok_or_else(|| corrupt_row("merge id", &key))?;
            merges.push((other, merge));
        }
        Ok(merges)
    }

    // Objects

    /// Object content, verified against its identifier.
    pub async fn read_object(
        &self,
        handler: &CoroutineHandler,
        object_id: &ObjectIdentifier,
    ) -> PageDbResult<Vec<u8>> {
        let content = self
            .get_required(handler, keys::object_key(object_id), || {
                format!("object {}", object_id)
            })
            .await?;

        if !object_id.matches(&content) {
            let id = object_id.to_string();
            log_event_with_fields(Event::ObjectContentMismatch, &[("object_id", &id)]);
            return Err(PageDbError::internal_consistency(
                "Stored object content does not match its identifier",
            )
            .with_details(format!("object_id: {}", id)));
        }
        Ok(content)
    }

    pub async fn has_object(
        &self,
        handler: &CoroutineHandler,
        object_id: &ObjectIdentifier,
    ) -> PageDbResult<bool> {
        Ok(self
            .get(handler, keys::object_status_key(object_id))
            .await?
            .is_some())
    }

    pub async fn get_object_status(
        &self,
        handler: &CoroutineHandler,
        object_id: &ObjectIdentifier,
    ) -> PageDbResult<ObjectStatus> {
        let key = keys::object_status_key(object_id);
        let value = self
            .get_required(handler, key.clone(), || format!("object {}", object_id))
            .await?;
        decode_object_status(&key, &value)
    }

    /// Objects not yet confirmed by the cloud.
    pub async fn get_unsynced_object_ids(
        &self,
        handler: &CoroutineHandler,
    ) -> PageDbResult<Vec<ObjectIdentifier>> {
        let rows = self.scan(handler, OBJECT_STATUS_PREFIX).await?;
        let mut unsynced = Vec::new();
        for (key, value) in rows {
            if decode_object_status(&key, &value)? == ObjectStatus::Local {
                let object_id = keys::object_id_from_key(OBJECT_STATUS_PREFIX, &key)
                    .ok_or_else(|| corrupt_row("object status key", &key))?;
                unsynced.push(object_id);
            }
        }
        Ok(unsynced)
    }

    // Commit sync state

    pub async fn get_commit_sync_state(
        &self,
        handler: &CoroutineHandler,
        commit_id: &CommitId,
    ) -> PageDbResult<SyncState> {
        let key = keys::commit_sync_key(commit_id);
        let value = self
            .get_required(handler, key.clone(), || {
                format!("sync state of commit {}", commit_id)
            })
            .await?;
        SyncState::decode(&value).ok_or_else(|| corrupt_row("commit sync state", &key))
    }

    /// A commit with no recorded sync state counts as not synced.
    pub async fn is_commit_synced(
        &self,
        handler: &CoroutineHandler,
        commit_id: &CommitId,
    ) -> PageDbResult<bool> {
        match self.get_commit_sync_state(handler, commit_id).await {
            Ok(state) => Ok(state.is_synced()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Unsynced commits in upload order: by generation, then id.
    pub async fn get_unsynced_commit_ids(
        &self,
        handler: &CoroutineHandler,
    ) -> PageDbResult<Vec<CommitId>> {
        let rows = self.scan(handler, COMMIT_SYNC_PREFIX).await?;
        let mut unsynced = Vec::new();
        for (key, value) in rows {
            let state =
                SyncState::decode(&value).ok_or_else(|| corrupt_row("commit sync state", &key))?;
            if let SyncState::Unsynced { generation } = state {
                let commit_id = keys::commit_id_from_key(COMMIT_SYNC_PREFIX, &key)
                    .ok_or_else(|| corrupt_row("commit sync key", &key))?;
                unsynced.push((generation, commit_id));
            }
        }
        unsynced.sort();
        Ok(unsynced.into_iter().map(|(_, id)| id).collect())
    }

    /// Highest generation recorded on this page, 0 if none.
    pub async fn get_page_generation(&self, handler: &CoroutineHandler) -> PageDbResult<u64> {
        let key = keys::PAGE_GENERATION_KEY.to_vec();
        match self.get(handler, key.clone()).await? {
            Some(value) => {
                keys::decode_u64(&value).ok_or_else(|| corrupt_row("page generation", &key))
            }
            None => Ok(0),
        }
    }

    /// Generation to assign to the next local commit.
    pub async fn next_generation(&self, handler: &CoroutineHandler) -> PageDbResult<u64> {
        let current = self.get_page_generation(handler).await?;
        current.checked_add(1).ok_or_else(|| {
            PageDbError::internal_consistency("Page generation counter is exhausted")
                .with_details(format!("generation: {}", current))
        })
    }

    // Sync metadata and online flag

    pub async fn get_sync_metadata(
        &self,
        handler: &CoroutineHandler,
        key: &str,
    ) -> PageDbResult<Vec<u8>> {
        self.get_required(handler, keys::sync_metadata_key(key), || {
            format!("sync metadata '{}'", key)
        })
        .await
    }

    pub async fn is_page_online(&self, handler: &CoroutineHandler) -> PageDbResult<bool> {
        Ok(self
            .get(handler, keys::PAGE_ONLINE_KEY.to_vec())
            .await?
            .is_some())
    }
}

pub(crate) fn decode_object_status(key: &[u8], value: &[u8]) -> PageDbResult<ObjectStatus> {
    match value {
        [byte] => ObjectStatus::from_byte(*byte),
        _ => None,
    }
    .ok_or_else(|| corrupt_row("object status", key))
}

/// Builds the error for a stored row that does not decode, logging it at FATAL.
pub(crate) fn corrupt_row(what: &str, key: &[u8]) -> PageDbError {
    let namespace = key.first().map(|b| *b as char).unwrap_or('?').to_string();
    log_event_with_fields(
        Event::StoreCorruption,
        &[("row", what), ("namespace", &namespace)],
    );
    PageDbError::internal_consistency(format!("Undecodable {}", what))
        .with_details(format!("namespace: {}, key_len: {}", namespace, key.len()))
}
