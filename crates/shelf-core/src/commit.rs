//! Commit engine
//!
//! Every mutation is one read-modify-write cycle:
//!
//! 1. Read the structure keys (and the item payloads when needed)
//! 2. Let the caller mutate a draft, or abort without writing
//! 3. Normalize entries, dock pins and the tag library
//! 4. If payloads changed, pack them into a brand new chunk set and write it
//! 5. Write the structure, the new `activeChunkSetId` and a fresh revision
//!    token in a single `set`
//! 6. Remove the replaced chunk set (and long-unreferenced ones) in a
//!    background task
//!
//! Commits of one engine run strictly in call order. Transient storage
//! failures retry the whole cycle with a linear backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::chunks::{self, ChunkLimits, CollectPolicy, ItemMap};
use crate::config::{EngineConfig, MAX_DOCK_CAPACITY};
use crate::entries;
use crate::models::{Entry, Folder, ItemPayload, Link, SystemItem, SYSTEM_IDS};
use crate::storage::{keys, StorageError, StorageMap, StorageResult, SyncStorage};
use crate::sync::{LockProvider, RevisionTracker};
use crate::tags;

/// Persisted dock capacity and page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub dock_capacity: usize,
    pub page_size: usize,
}

impl Settings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            dock_capacity: config.dock_capacity,
            page_size: config.page_size,
        }
        .normalized()
    }

    /// Clamp to the supported ranges
    pub fn normalized(self) -> Self {
        Self {
            dock_capacity: self.dock_capacity.min(MAX_DOCK_CAPACITY),
            page_size: self.page_size.max(1),
        }
    }
}

/// Everything one tab knows about the persisted state
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub entries: Vec<Entry>,
    pub dock_pins: Vec<String>,
    pub tags: Vec<String>,
    pub items: ItemMap,
    /// False when `items` was not read for this snapshot
    pub items_loaded: bool,
    pub revision: Option<String>,
    pub active_chunk_set: Option<String>,
    pub chunk_keys: Vec<String>,
    /// Chunk keys of the active set that could not be read
    pub missing_chunks: Vec<String>,
    pub settings: Settings,
    pub system_items: HashMap<String, SystemItem>,
}

impl Snapshot {
    pub fn empty(settings: Settings) -> Self {
        Self {
            entries: Vec::new(),
            dock_pins: Vec::new(),
            tags: Vec::new(),
            items: ItemMap::new(),
            items_loaded: true,
            revision: None,
            active_chunk_set: None,
            chunk_keys: Vec::new(),
            missing_chunks: Vec::new(),
            settings,
            system_items: HashMap::new(),
        }
    }

    /// True when the item map is known to lack payloads of the active set
    pub fn is_partial(&self) -> bool {
        !self.missing_chunks.is_empty()
    }

    pub fn link(&self, id: &str) -> Option<&Link> {
        self.items.get(id).and_then(ItemPayload::as_link)
    }

    pub fn folder(&self, id: &str) -> Option<&Folder> {
        self.items.get(id).and_then(ItemPayload::as_folder)
    }

    /// Folder containing `child`, if any
    pub fn folder_of(&self, child: &str) -> Option<&Folder> {
        folder_of(&self.items, child)
    }
}

fn folder_of<'a>(items: &'a ItemMap, child: &str) -> Option<&'a Folder> {
    let mut folders: Vec<&Folder> = items
        .values()
        .filter_map(ItemPayload::as_folder)
        .filter(|f| f.contains(child))
        .collect();
    // Several owners only happen before repair; pick one deterministically
    folders.sort_by(|a, b| a.id.cmp(&b.id));
    folders.into_iter().next()
}

/// Mutable state handed to a commit's apply step
#[derive(Debug, Clone)]
pub struct CommitDraft {
    pub entries: Vec<Entry>,
    pub dock_pins: Vec<String>,
    pub tags: Vec<String>,
    pub items: ItemMap,
    pub settings: Settings,
    pub system_items: HashMap<String, SystemItem>,
    before: Snapshot,
}

impl CommitDraft {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        Self {
            entries: snapshot.entries.clone(),
            dock_pins: snapshot.dock_pins.clone(),
            tags: snapshot.tags.clone(),
            items: snapshot.items.clone(),
            settings: snapshot.settings,
            system_items: snapshot.system_items.clone(),
            before: snapshot,
        }
    }

    /// State as read at the start of this commit, before any mutation
    pub fn before(&self) -> &Snapshot {
        &self.before
    }

    pub fn items_loaded(&self) -> bool {
        self.before.items_loaded
    }

    pub fn is_partial(&self) -> bool {
        self.before.is_partial()
    }

    pub fn page_size(&self) -> usize {
        self.settings.page_size
    }

    pub fn link(&self, id: &str) -> Option<&Link> {
        self.items.get(id).and_then(ItemPayload::as_link)
    }

    pub fn folder(&self, id: &str) -> Option<&Folder> {
        self.items.get(id).and_then(ItemPayload::as_folder)
    }

    pub fn folder_mut(&mut self, id: &str) -> Option<&mut Folder> {
        self.items.get_mut(id).and_then(ItemPayload::as_folder_mut)
    }

    pub fn folder_of(&self, child: &str) -> Option<&Folder> {
        folder_of(&self.items, child)
    }

    pub fn set_item(&mut self, payload: impl Into<ItemPayload>) {
        let payload = payload.into();
        self.items.insert(payload.id().to_string(), payload);
    }

    pub fn remove_item(&mut self, id: &str) -> Option<ItemPayload> {
        self.items.remove(id)
    }

    pub fn has_entry(&self, id: &str) -> bool {
        entries::position_of(&self.entries, id).is_some()
    }

    /// Insert a top-level entry at a page position (or append)
    pub fn insert_entry(&mut self, entry: Entry, position: Option<entries::Position>) {
        self.entries = entries::insert_at(&self.entries, entry, position, self.settings.page_size);
    }

    pub fn remove_entry(&mut self, id: &str) {
        self.entries = entries::remove_id(&self.entries, id);
    }

    /// Merge item tags into the library
    pub fn merge_tags(&mut self, incoming: &[String]) {
        self.tags = tags::merge_into_library(&self.tags, incoming);
    }
}

/// Result of an apply step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apply<T> {
    /// Write the draft and return the value
    Commit(T),
    /// Return the value without writing anything
    Abort(T),
}

impl<T, E> Apply<Result<T, E>> {
    /// Commit on `Ok`, abort on `Err`
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Apply::Commit(Ok(value)),
            Err(e) => Apply::Abort(Err(e)),
        }
    }
}

/// Payload changes known before the apply step runs
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    pub items_to_set: Vec<ItemPayload>,
    pub item_ids_to_remove: Vec<String>,
    /// Read the full item map even without explicit payload changes
    pub needs_item_map: bool,
}

impl CommitRequest {
    /// Structure-only commit
    pub fn structure() -> Self {
        Self::default()
    }

    /// Commit that reads (and may change) item payloads
    pub fn with_items() -> Self {
        Self {
            needs_item_map: true,
            ..Self::default()
        }
    }

    pub fn set_items(mut self, items: impl IntoIterator<Item = ItemPayload>) -> Self {
        self.items_to_set.extend(items);
        self
    }

    pub fn remove_items(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.item_ids_to_remove.extend(ids);
        self
    }

    fn reads_items(&self) -> bool {
        self.needs_item_map || !self.items_to_set.is_empty() || !self.item_ids_to_remove.is_empty()
    }
}

/// What a finished commit returns
#[derive(Debug, Clone)]
pub struct CommitOutcome<T> {
    pub value: T,
    /// True if anything was written
    pub committed: bool,
    /// State after the commit (or as read, when nothing was written)
    pub snapshot: Snapshot,
}

/// A commit could not be written
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Commit failed after {attempts} attempt(s): {source}")]
    Storage {
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

impl CommitError {
    pub fn attempts(&self) -> u32 {
        match self {
            CommitError::Storage { attempts, .. } => *attempts,
        }
    }

    pub fn storage_error(&self) -> &StorageError {
        match self {
            CommitError::Storage { source, .. } => source,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self.storage_error(), StorageError::QuotaExceeded { .. })
    }
}

/// Runs commits against one sync area for one tab
#[derive(Clone)]
pub struct CommitEngine {
    storage: Arc<dyn SyncStorage>,
    locks: Arc<dyn LockProvider>,
    chain: Arc<AsyncMutex<()>>,
    revisions: Arc<Mutex<RevisionTracker>>,
    config: EngineConfig,
}

impl CommitEngine {
    pub fn new(
        storage: Arc<dyn SyncStorage>,
        locks: Arc<dyn LockProvider>,
        config: EngineConfig,
    ) -> Self {
        let revisions = RevisionTracker::new(config.echo_expiry);
        Self {
            storage,
            locks,
            chain: Arc::new(AsyncMutex::new(())),
            revisions: Arc::new(Mutex::new(revisions)),
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn SyncStorage> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Revision tokens issued by this engine
    pub fn revisions(&self) -> MutexGuard<'_, RevisionTracker> {
        self.revisions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chunk_limits(&self) -> ChunkLimits {
        ChunkLimits {
            budget_bytes: self.config.chunk_budget_bytes,
            per_item_quota_bytes: self.config.per_item_quota_bytes,
        }
    }

    /// Read the full persisted state
    pub async fn load(&self) -> StorageResult<Snapshot> {
        self.read_snapshot(true).await
    }

    /// Read the structure keys, and the item payloads when `with_items`
    ///
    /// A chunk set that lost chunks while being read was usually replaced
    /// in the meantime; the read starts over if `activeChunkSetId` moved.
    pub async fn read_snapshot(&self, with_items: bool) -> StorageResult<Snapshot> {
        let mut attempt = 1;
        loop {
            let snapshot = self.read_snapshot_once(with_items).await?;
            if !snapshot.is_partial() {
                return Ok(snapshot);
            }

            let active = self.read_active_chunk_set().await?;
            if active == snapshot.active_chunk_set || attempt >= MAX_SNAPSHOT_READS {
                warn!(
                    "Chunk set {:?} is missing {} chunk(s); payloads in them are unavailable",
                    snapshot.active_chunk_set,
                    snapshot.missing_chunks.len()
                );
                return Ok(snapshot);
            }
            debug!("Chunk set moved to {:?} while reading, reading again", active);
            attempt += 1;
        }
    }

    async fn read_active_chunk_set(&self) -> StorageResult<Option<String>> {
        Ok(self
            .storage
            .get(&[keys::ACTIVE_CHUNK_SET])
            .await?
            .get(keys::ACTIVE_CHUNK_SET)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn read_snapshot_once(&self, with_items: bool) -> StorageResult<Snapshot> {
        let mut wanted: Vec<&str> = keys::STRUCTURE.to_vec();
        wanted.extend(SYSTEM_IDS);
        let stored = self.storage.get(&wanted).await?;

        let settings = stored
            .get(keys::SETTINGS)
            .and_then(|v| serde_json::from_value::<Settings>(v.clone()).ok())
            .map(Settings::normalized)
            .unwrap_or_else(|| Settings::from_config(&self.config));

        let system_items = SYSTEM_IDS
            .iter()
            .filter_map(|id| {
                let value = stored.get(*id)?;
                match serde_json::from_value::<SystemItem>(value.clone()) {
                    Ok(item) => Some((id.to_string(), item)),
                    Err(e) => {
                        debug!("Ignoring malformed system item {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        let active_chunk_set = stored
            .get(keys::ACTIVE_CHUNK_SET)
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut snapshot = Snapshot {
            entries: entries::filter_valid(stored.get(keys::ITEMS).unwrap_or(&Value::Null)),
            dock_pins: string_list(stored.get(keys::DOCK_PINS)),
            tags: string_list(stored.get(keys::TAGS)),
            items: ItemMap::new(),
            items_loaded: false,
            revision: stored
                .get(keys::REVISION)
                .and_then(Value::as_str)
                .map(str::to_string),
            active_chunk_set,
            chunk_keys: Vec::new(),
            missing_chunks: Vec::new(),
            settings,
            system_items,
        };

        if with_items {
            if let Some(ref id) = snapshot.active_chunk_set {
                let index_key = chunks::index_key(id);
                let index = self.storage.get(&[index_key.as_str()]).await?;
                match index.get(&index_key) {
                    Some(value) => {
                        snapshot.chunk_keys = chunks::index_entries(value);
                        let read =
                            chunks::read_chunk_set(self.storage.as_ref(), &snapshot.chunk_keys).await?;
                        snapshot.items = read.items;
                        snapshot.missing_chunks = read.missing;
                    }
                    None => snapshot.missing_chunks.push(index_key),
                }
            }
            snapshot.items_loaded = true;
        }

        Ok(snapshot)
    }

    /// Run one commit, retrying transient failures
    pub async fn commit<T, F>(
        &self,
        request: CommitRequest,
        mut apply: F,
    ) -> Result<CommitOutcome<T>, CommitError>
    where
        F: FnMut(&mut CommitDraft) -> Apply<T> + Send,
        T: Send,
    {
        let _chain = self.chain.lock().await;
        let max_attempts = self.config.max_commit_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.try_commit(&request, &mut apply).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "Commit attempt {}/{} failed: {}; retrying",
                        attempt, max_attempts, e
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Commit failed after {} attempt(s): {}", attempt, e);
                    return Err(CommitError::Storage {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    async fn try_commit<T, F>(
        &self,
        request: &CommitRequest,
        apply: &mut F,
    ) -> StorageResult<CommitOutcome<T>>
    where
        F: FnMut(&mut CommitDraft) -> Apply<T> + Send,
        T: Send,
    {
        let _lock = self.locks.try_acquire(&self.config.lock_name).await;
        let snapshot = self.read_snapshot(request.reads_items()).await?;

        let mut draft = CommitDraft::new(snapshot);
        for payload in &request.items_to_set {
            draft.set_item(payload.clone());
        }
        for id in &request.item_ids_to_remove {
            draft.remove_item(id);
        }

        let value = match apply(&mut draft) {
            Apply::Commit(value) => value,
            Apply::Abort(value) => {
                return Ok(CommitOutcome {
                    value,
                    committed: false,
                    snapshot: draft.before,
                });
            }
        };

        let CommitDraft {
            entries,
            dock_pins,
            tags: library,
            items,
            settings,
            system_items,
            before,
        } = draft;

        let entries = entries::ensure_system_entries(&entries::normalize(&entries));
        let dock_pins = dedupe(dock_pins);
        let library = tags::normalize_library(&library);
        let settings = settings.normalized();

        let mut structure = StorageMap::new();
        if entries != before.entries {
            structure.insert(keys::ITEMS.to_string(), entries::to_value(&entries));
        }
        if dock_pins != before.dock_pins {
            structure.insert(keys::DOCK_PINS.to_string(), string_values(&dock_pins));
        }
        if library != before.tags {
            structure.insert(keys::TAGS.to_string(), string_values(&library));
        }
        if settings != before.settings {
            structure.insert(keys::SETTINGS.to_string(), serde_json::to_value(settings)?);
        }
        for (id, item) in &system_items {
            if before.system_items.get(id) != Some(item) {
                structure.insert(id.clone(), serde_json::to_value(item)?);
            }
        }

        let items_changed = items != before.items;
        if items_changed && !before.items_loaded {
            warn!("Ignoring payload changes made without reading the item map");
        }
        let repack = items_changed && before.items_loaded;

        if structure.is_empty() && !repack {
            debug!("Commit produced no changes, nothing written");
            return Ok(CommitOutcome {
                value,
                committed: false,
                snapshot: before,
            });
        }

        let mut active_chunk_set = before.active_chunk_set.clone();
        let mut chunk_keys = before.chunk_keys.clone();
        let mut missing_chunks = before.missing_chunks.clone();
        if repack {
            let chunk_set_id = chunks::new_chunk_set_id();
            let packed = chunks::pack(&items, &chunk_set_id, self.chunk_limits());
            chunk_keys = packed.chunk_keys.clone();
            // The chunk set must be complete before anything points at it
            self.storage.set(packed.into_storage_map()).await?;
            structure.insert(
                keys::ACTIVE_CHUNK_SET.to_string(),
                Value::String(chunk_set_id.clone()),
            );
            active_chunk_set = Some(chunk_set_id);
            missing_chunks.clear();
        }

        let token = self.revisions().issue();
        structure.insert(
            keys::REVISION.to_string(),
            Value::String(token.as_str().to_string()),
        );
        let written: Vec<String> = structure.keys().cloned().collect();
        if let Err(e) = self.storage.set(structure).await {
            self.revisions().discard(&token);
            return Err(e);
        }
        info!("Committed {} (keys: {})", token, written.join(", "));

        if repack {
            self.spawn_cleanup(before.active_chunk_set.clone());
        }

        let items = if before.items_loaded { items } else { before.items };
        Ok(CommitOutcome {
            value,
            committed: true,
            snapshot: Snapshot {
                entries,
                dock_pins,
                tags: library,
                items,
                items_loaded: before.items_loaded,
                revision: Some(token.as_str().to_string()),
                active_chunk_set,
                chunk_keys,
                missing_chunks,
                settings,
                system_items,
            },
        })
    }

    /// Remove unreferenced chunk sets older than the grace period, while
    /// holding the commit locks
    pub async fn collect_obsolete_chunks(&self) -> StorageResult<Vec<String>> {
        let policy = CollectPolicy::new(None, self.config.chunk_grace);
        collect_locked(
            self.storage.clone(),
            self.locks.clone(),
            self.chain.clone(),
            self.config.lock_name.clone(),
            policy,
        )
        .await
    }

    fn spawn_cleanup(&self, superseded: Option<String>) {
        let storage = self.storage.clone();
        let locks = self.locks.clone();
        let chain = self.chain.clone();
        let lock_name = self.config.lock_name.clone();
        let policy = CollectPolicy::new(superseded, self.config.chunk_grace);

        tokio::spawn(async move {
            if let Err(e) = collect_locked(storage, locks, chain, lock_name, policy).await {
                warn!("Chunk cleanup failed: {}", e);
            }
        });
    }
}

/// Reads of one snapshot before a partial chunk set is accepted
const MAX_SNAPSHOT_READS: u32 = 3;

async fn collect_locked(
    storage: Arc<dyn SyncStorage>,
    locks: Arc<dyn LockProvider>,
    chain: Arc<AsyncMutex<()>>,
    lock_name: String,
    policy: CollectPolicy,
) -> StorageResult<Vec<String>> {
    let _chain = chain.lock().await;
    let _lock = locks.try_acquire(&lock_name).await;
    chunks::collect_obsolete_chunks(storage.as_ref(), &policy).await
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn string_values(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Link;
    use crate::storage::{MemoryStorage, StorageQuota};
    use crate::sync::NoopLocks;
    use serde_json::json;
    use std::time::Duration;

    fn engine_with(storage: Arc<MemoryStorage>) -> CommitEngine {
        let config = EngineConfig {
            retry_backoff: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        CommitEngine::new(storage, Arc::new(NoopLocks), config)
    }

    fn add_link(draft: &mut CommitDraft, id: &str) -> Apply<()> {
        draft.set_item(Link::with_id(id, "https://example.com"));
        draft.insert_entry(Entry::Item(id.to_string()), None);
        Apply::Commit(())
    }

    #[tokio::test]
    async fn test_first_commit_writes_structure_and_chunks() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());

        let outcome = engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        assert!(outcome.committed);

        let entries = storage.peek(keys::ITEMS).unwrap();
        assert_eq!(entries, json!(["qlink_a", "qsys_add", "qsys_settings"]));
        let active = storage.peek(keys::ACTIVE_CHUNK_SET).unwrap();
        let active = active.as_str().unwrap();
        assert!(storage.peek(&chunks::index_key(active)).is_some());

        let revision = storage.peek(keys::REVISION).unwrap();
        assert!(revision.as_str().unwrap().starts_with("rev-"));

        let loaded = engine.load().await.unwrap();
        assert!(loaded.link("qlink_a").is_some());
        assert_eq!(loaded.entries, outcome.snapshot.entries);
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());

        let outcome = engine
            .commit(CommitRequest::with_items(), |draft| {
                draft.set_item(Link::with_id("qlink_a", "https://example.com"));
                Apply::Abort("refused")
            })
            .await
            .unwrap();
        assert_eq!(outcome.value, "refused");
        assert!(!outcome.committed);
        assert_eq!(storage.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_commit_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        let writes = storage.write_count();

        let outcome = engine
            .commit(CommitRequest::with_items(), |_| Apply::Commit(()))
            .await
            .unwrap();
        assert!(!outcome.committed);
        assert_eq!(storage.write_count(), writes);
    }

    #[tokio::test]
    async fn test_structure_only_commit_keeps_chunk_set() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        let active = storage.peek(keys::ACTIVE_CHUNK_SET);

        engine
            .commit(CommitRequest::structure(), |draft| {
                draft.dock_pins.push("qlink_a".to_string());
                Apply::Commit(())
            })
            .await
            .unwrap();
        assert_eq!(storage.peek(keys::ACTIVE_CHUNK_SET), active);
        assert_eq!(storage.peek(keys::DOCK_PINS), Some(json!(["qlink_a"])));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        storage.fail_next_writes(2, "network connection lost");

        let outcome = engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        assert!(outcome.committed);
        assert!(engine.load().await.unwrap().link("qlink_a").is_some());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        storage.fail_next_writes(5, "request timed out");

        let mut calls = 0;
        let err = engine
            .commit(CommitRequest::with_items(), |d| {
                calls += 1;
                add_link(d, "qlink_a")
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls, 3);
        assert!(storage.peek(keys::ITEMS).is_none());
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        storage.fail_next_writes(1, "invalid argument");

        let err = engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert!(matches!(err.storage_error(), StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_old_pointer() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        let active = storage.peek(keys::ACTIVE_CHUNK_SET);

        // The new chunk set never lands, so the pointer must not move
        let single_attempt = EngineConfig {
            max_commit_attempts: 1,
            ..engine.config().clone()
        };
        let engine = CommitEngine::new(storage.clone(), Arc::new(NoopLocks), single_attempt);
        let result = engine
            .commit(CommitRequest::with_items(), |draft| {
                storage.fail_next_writes(1, "disk on fire");
                add_link(draft, "qlink_b")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(storage.peek(keys::ACTIVE_CHUNK_SET), active);

        let loaded = engine.load().await.unwrap();
        assert!(loaded.link("qlink_a").is_some());
        assert!(loaded.link("qlink_b").is_none());
    }

    #[tokio::test]
    async fn test_old_chunk_sets_are_collected() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        let first = storage.peek(keys::ACTIVE_CHUNK_SET).unwrap();
        let first_index = chunks::index_key(first.as_str().unwrap());

        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_b"))
            .await
            .unwrap();

        // The replaced set goes in the background cleanup
        for _ in 0..100 {
            if storage.peek(&first_index).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(storage.peek(&first_index).is_none());
        let loaded = engine.load().await.unwrap();
        assert_eq!(loaded.items.len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_set_not_yet_activated() {
        let storage = Arc::new(MemoryStorage::new());
        let writer_a = engine_with(storage.clone());
        let writer_b = engine_with(storage.clone());
        writer_a
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();

        // Writer A has packed and written its next set but not swapped yet
        let mut next = writer_a.load().await.unwrap().items;
        next.insert("qlink_c".to_string(), Link::with_id("qlink_c", "https://c.example").into());
        let pending_id = chunks::new_chunk_set_id();
        let packed = chunks::pack(&next, &pending_id, ChunkLimits::default());
        let pending_keys = packed.chunk_keys.clone();
        storage.set(packed.into_storage_map()).await.unwrap();

        // Writer B, unaware of it, commits and collects
        writer_b
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_b"))
            .await
            .unwrap();
        writer_b.collect_obsolete_chunks().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(storage.peek(&chunks::index_key(&pending_id)).is_some());
        for key in &pending_keys {
            assert!(storage.peek(key).is_some(), "{} was removed", key);
        }

        // A activates its set; nothing it points at is gone
        let mut swap = StorageMap::new();
        swap.insert(keys::ACTIVE_CHUNK_SET.to_string(), json!(pending_id));
        storage.set(swap).await.unwrap();
        let loaded = writer_a.load().await.unwrap();
        assert!(!loaded.is_partial());
        assert!(loaded.link("qlink_a").is_some());
        assert!(loaded.link("qlink_c").is_some());
    }

    #[tokio::test]
    async fn test_old_unreferenced_sets_are_collected() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = CommitEngine::new(
            storage.clone(),
            Arc::new(NoopLocks),
            EngineConfig {
                chunk_grace: Duration::ZERO,
                ..EngineConfig::default()
            },
        );
        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        storage.seed("qcsleftover_index", json!(["qcsleftover_0"]));
        storage.seed("qcsleftover_0", json!({}));

        let mut removed = engine.collect_obsolete_chunks().await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["qcsleftover_0", "qcsleftover_index"]);
        assert!(engine.load().await.unwrap().link("qlink_a").is_some());
    }

    #[tokio::test]
    async fn test_missing_chunk_marks_snapshot_partial() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();
        let loaded = engine.load().await.unwrap();
        assert!(!loaded.is_partial());

        storage.remove(&loaded.chunk_keys).await.unwrap();
        let damaged = engine.load().await.unwrap();
        assert!(damaged.is_partial());
        assert_eq!(damaged.missing_chunks, loaded.chunk_keys);
        assert!(damaged.items.is_empty());
        assert_eq!(damaged.entries, loaded.entries);
    }

    #[tokio::test]
    async fn test_quota_error_surfaces_after_retries() {
        let storage = Arc::new(MemoryStorage::with_quota(StorageQuota {
            per_item_bytes: 8_192,
            total_bytes: 300,
        }));
        let engine = engine_with(storage.clone());

        let err = engine
            .commit(CommitRequest::with_items(), |draft| {
                for n in 0..10 {
                    add_link(draft, &format!("qlink_{}", n));
                }
                Apply::Commit(())
            })
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(err.attempts(), 3);
    }

    #[tokio::test]
    async fn test_own_commits_are_recognised_as_echoes() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine_with(storage.clone());
        engine
            .commit(CommitRequest::with_items(), |d| add_link(d, "qlink_a"))
            .await
            .unwrap();

        let revision = storage.peek(keys::REVISION).unwrap();
        assert!(engine.revisions().is_own_echo(revision.as_str().unwrap()));
    }

    #[test]
    fn test_settings_normalized() {
        let settings = Settings {
            dock_capacity: 99,
            page_size: 0,
        }
        .normalized();
        assert_eq!(settings.dock_capacity, MAX_DOCK_CAPACITY);
        assert_eq!(settings.page_size, 1);
        assert_eq!(
            serde_json::to_value(settings).unwrap(),
            json!({"dockCapacity": 20, "pageSize": 1})
        );
    }
}
