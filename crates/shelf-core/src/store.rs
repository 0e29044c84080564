//! Store facade
//!
//! The `Store` is what a tab holds. It keeps an in-memory snapshot of the
//! persisted state for reads, routes every mutation through the commit
//! engine, and publishes a `StoreEvent` after each commit that changed
//! something.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open(storage, Arc::new(NamedLocks::new()), EngineConfig::default()).await?;
//! let _listener = store.spawn_change_listener();
//!
//! let link = store.add_item(NewLink::new("https://example.com"), None).await?;
//! store.pin_to_dock(&link.id).await?;
//! let first_page = store.get_page(0);
//! ```
//!
//! Pages added with `add_page` are virtual until something is placed on
//! them: the persisted list never ends with a page break.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunks::{self, ChunkLimits};
use crate::commit::{Apply, CommitDraft, CommitEngine, CommitOutcome, CommitRequest, Settings, Snapshot};
use crate::config::{Config, EngineConfig};
use crate::dock::{self, PinOutcome};
use crate::entries::{self, Position};
use crate::error::{StoreResult, ValidationError};
use crate::events::{FolderAction, StoreEvent};
use crate::folders::{self, DeleteMode, MergeOutcome};
use crate::models::{
    check_len, is_system_id, Entry, Folder, ItemPayload, Link, LinkUpdate, NewLink, SystemItem,
    MAX_ICON_LEN, MAX_TITLE_LEN,
};
use crate::quota::{self, QuotaErrorCode, QuotaPrecheck};
use crate::repair::{self, RepairReport};
use crate::storage::{keys, SqliteStorage, StorageChange, StorageMap, SyncStorage};
use crate::sync::{classify, ChangeAction, LockProvider, NamedLocks, RevisionToken};
use crate::tags;

const EVENT_CAPACITY: usize = 256;

/// One slot of a rendered page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PageItem {
    Link(Link),
    Folder {
        folder: Folder,
        /// Children that resolve to a link, in folder order
        children: Vec<Link>,
    },
    System(SystemItem),
}

impl PageItem {
    pub fn id(&self) -> &str {
        match self {
            PageItem::Link(link) => &link.id,
            PageItem::Folder { folder, .. } => &folder.id,
            PageItem::System(item) => &item.id,
        }
    }
}

/// Result of a bulk import
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub precheck: QuotaPrecheck,
    /// Ids of the imported links; empty when the precheck refused
    pub item_ids: Vec<String>,
}

impl ImportReport {
    pub fn is_ok(&self) -> bool {
        self.precheck.ok
    }
}

struct StoreInner {
    engine: CommitEngine,
    cache: RwLock<Snapshot>,
    events: broadcast::Sender<StoreEvent>,
    virtual_pages: AtomicUsize,
    repairing: AtomicBool,
}

/// Shelf state for one tab
///
/// Cheap to clone; clones share the cache, the commit chain and the
/// event channel.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Load the persisted state and start serving
    ///
    /// Inconsistencies found while loading are repaired by a background
    /// commit; the load itself never waits for it.
    pub async fn open(
        storage: Arc<dyn SyncStorage>,
        locks: Arc<dyn LockProvider>,
        config: EngineConfig,
    ) -> StoreResult<Self> {
        let engine = CommitEngine::new(storage, locks, config);
        let snapshot = engine.load().await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "Opened store: {} entries, {} items",
            snapshot.entries.len(),
            snapshot.items.len()
        );

        let needs_repair = !repair::inspect(&snapshot).is_clean();
        let store = Self {
            inner: Arc::new(StoreInner {
                engine,
                cache: RwLock::new(snapshot),
                events,
                virtual_pages: AtomicUsize::new(0),
                repairing: AtomicBool::new(false),
            }),
        };
        if needs_repair {
            store.spawn_repair();
        }
        Ok(store)
    }

    /// Open the local SQLite area named by `config`
    pub async fn open_with_config(config: &Config) -> StoreResult<Self> {
        let storage = SqliteStorage::open(&config.sqlite_path(), config.quota())?;
        Self::open(Arc::new(storage), Arc::new(NamedLocks::new()), config.engine()).await
    }

    pub fn engine(&self) -> &CommitEngine {
        &self.inner.engine
    }

    pub fn storage(&self) -> &Arc<dyn SyncStorage> {
        self.inner.engine.storage()
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the cached state
    pub fn snapshot(&self) -> Snapshot {
        self.cache().clone()
    }

    pub fn settings(&self) -> Settings {
        self.cache().settings
    }

    fn cache(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_mut(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: StoreEvent) {
        debug!("Event: {}", event.name());
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn virtual_pages(&self) -> usize {
        self.inner.virtual_pages.load(Ordering::SeqCst)
    }

    fn consume_virtual_page(&self) {
        let _ = self
            .inner
            .virtual_pages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Replace the cache with a freshly loaded snapshot
    fn install(&self, snapshot: Snapshot) {
        let report = repair::inspect(&snapshot);
        *self.cache_mut() = snapshot;
        if !report.is_clean() {
            debug!("Snapshot needs repair: {:?}", report);
            self.spawn_repair();
        }
    }

    /// Re-read everything from storage
    pub async fn reload(&self) -> StoreResult<()> {
        let snapshot = self.inner.engine.load().await?;
        self.install(snapshot);
        Ok(())
    }

    /// Take a commit result into the cache
    ///
    /// Structure-only commits carry no payloads; the cached ones are kept
    /// unless the chunk set moved underneath, in which case everything is
    /// re-read.
    async fn absorb(&self, mut snapshot: Snapshot) -> StoreResult<()> {
        if !snapshot.items_loaded {
            let stale = {
                let cache = self.cache();
                if cache.items_loaded && cache.active_chunk_set == snapshot.active_chunk_set {
                    snapshot.items = cache.items.clone();
                    snapshot.chunk_keys = cache.chunk_keys.clone();
                    snapshot.missing_chunks = cache.missing_chunks.clone();
                    snapshot.items_loaded = true;
                    false
                } else {
                    true
                }
            };
            if stale {
                snapshot = self.inner.engine.load().await?;
            }
        }
        *self.cache_mut() = snapshot;
        Ok(())
    }

    /// Run a commit and refresh the cache
    ///
    /// Dock and tag changes are published here so that every operation
    /// reports them the same way.
    async fn run<T, F>(&self, request: CommitRequest, apply: F) -> StoreResult<CommitOutcome<T>>
    where
        F: FnMut(&mut CommitDraft) -> Apply<T> + Send,
        T: Send,
    {
        let (pins_before, tags_before, capacity_before) = {
            let cache = self.cache();
            (dock::visible_pins(&cache), cache.tags.clone(), cache.settings.dock_capacity)
        };

        let outcome = self.inner.engine.commit(request, apply).await?;
        if !outcome.committed {
            return Ok(outcome);
        }
        self.absorb(outcome.snapshot.clone()).await?;

        let (pins_after, tags_after, capacity_after) = {
            let cache = self.cache();
            (dock::visible_pins(&cache), cache.tags.clone(), cache.settings.dock_capacity)
        };
        if pins_before != pins_after || capacity_before != capacity_after {
            self.emit(StoreEvent::DockChanged { pins: pins_after });
        }
        if tags_before != tags_after {
            self.emit(StoreEvent::TagsChanged { tags: tags_after });
        }
        Ok(outcome)
    }

    /// Run a commit whose apply step may fail validation
    ///
    /// A validation error aborts the commit and is returned as
    /// `StoreError::Validation`. The flag tells whether anything was written.
    async fn mutate<T, F>(&self, request: CommitRequest, mut apply: F) -> StoreResult<(T, bool)>
    where
        F: FnMut(&mut CommitDraft) -> Result<T, ValidationError> + Send,
        T: Send,
    {
        let outcome = self
            .run(request, move |draft| Apply::from_result(apply(draft)))
            .await?;
        let committed = outcome.committed;
        Ok((outcome.value?, committed))
    }

    fn locate(&self, id: &str) -> Option<Position> {
        let cache = self.cache();
        entries::locate(&cache.entries, id, cache.settings.page_size)
    }

    // ==================== Items ====================

    /// Validate and add a link, appended or at `position`
    pub async fn add_item(&self, new: NewLink, position: Option<Position>) -> StoreResult<Link> {
        let link = new.into_link()?;
        let virtual_pages = self.virtual_pages();

        let (opened_page, _) = self
            .mutate(
                CommitRequest::structure().set_items([ItemPayload::from(link.clone())]),
                |draft| {
                    draft.merge_tags(&link.tags);
                    Ok(place(draft, Entry::Item(link.id.clone()), position, virtual_pages))
                },
            )
            .await?;
        if opened_page {
            self.consume_virtual_page();
        }

        self.emit(StoreEvent::ItemAdded {
            item_id: link.id.clone(),
            position: self.locate(&link.id),
        });
        Ok(link)
    }

    /// Change fields of an existing link, wherever it lives
    pub async fn update_item(&self, id: &str, update: LinkUpdate) -> StoreResult<Link> {
        let (link, committed) = self
            .mutate(CommitRequest::with_items(), |draft| {
                if draft.folder(id).is_some() {
                    return Err(ValidationError::IsFolder(id.to_string()));
                }
                let current = draft
                    .link(id)
                    .ok_or_else(|| ValidationError::NotFound(id.to_string()))?;
                let updated = update.apply_to(current)?;
                draft.merge_tags(&updated.tags);
                draft.set_item(updated.clone());
                Ok(updated)
            })
            .await?;

        if committed {
            self.emit(StoreEvent::ItemUpdated {
                item_id: id.to_string(),
            });
        }
        Ok(link)
    }

    /// Delete a link, or a folder with its children; returns removed ids
    pub async fn delete_item(&self, id: &str) -> StoreResult<Vec<String>> {
        let was_folder = self.cache().folder(id).is_some();
        let (removed, _) = self
            .mutate(CommitRequest::with_items(), |draft| folders::delete_entry(draft, id))
            .await?;

        if was_folder {
            self.emit(StoreEvent::FolderDeleted {
                folder_id: id.to_string(),
            });
        } else {
            self.emit(StoreEvent::ItemDeleted {
                item_id: id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Delete several entries in one commit
    ///
    /// Unknown and system ids are skipped.
    pub async fn remove_items(&self, ids: &[String]) -> StoreResult<Vec<String>> {
        let (removed, _) = self
            .mutate(CommitRequest::with_items(), |draft| {
                let mut removed = Vec::new();
                for id in ids {
                    match folders::delete_entry(draft, id) {
                        Ok(ids) => removed.extend(ids),
                        Err(e) => debug!("Skipping {}: {}", id, e),
                    }
                }
                Ok(removed)
            })
            .await?;

        if !removed.is_empty() {
            self.emit(StoreEvent::ItemsBulkDeleted {
                item_ids: removed.clone(),
            });
        }
        Ok(removed)
    }

    /// Move an entry to a page position
    ///
    /// A link inside a folder is released from it.
    pub async fn move_item(&self, id: &str, position: Position) -> StoreResult<Option<Position>> {
        let virtual_pages = self.virtual_pages();

        let (opened_page, _) = self
            .mutate(CommitRequest::with_items(), |draft| {
                let entry = Entry::from_id(id).ok_or_else(|| ValidationError::InvalidId(id.to_string()))?;
                if let Some(folder_id) = draft.folder_of(id).map(|f| f.id.clone()) {
                    folders::remove_from_folder(draft, &folder_id, id, None)?;
                }
                if !draft.has_entry(id) {
                    return Err(ValidationError::NotFound(id.to_string()));
                }
                draft.remove_entry(id);
                Ok(place(draft, entry, Some(position), virtual_pages))
            })
            .await?;
        if opened_page {
            self.consume_virtual_page();
        }

        let landed = self.locate(id);
        self.emit(StoreEvent::ItemMoved {
            item_id: id.to_string(),
            position: landed,
        });
        Ok(landed)
    }

    /// Persist the layout shown on screen, one id list per page
    ///
    /// Ids the layout does not know are dropped; entries missing from the
    /// layout keep their relative order at the end.
    pub async fn reorder_from_dom(&self, pages: &[Vec<String>]) -> StoreResult<()> {
        self.mutate(CommitRequest::structure(), |draft| {
            let current: HashSet<&str> = draft.entries.iter().filter_map(Entry::id).collect();
            let mut next: Vec<Entry> = entries::from_pages(pages)
                .into_iter()
                .filter(|e| e.id().map_or(true, |id| current.contains(id)))
                .collect();

            let placed: HashSet<String> = next
                .iter()
                .filter_map(Entry::id)
                .map(str::to_string)
                .collect();
            next.extend(
                draft
                    .entries
                    .iter()
                    .filter(|e| e.id().is_some_and(|id| !placed.contains(id)))
                    .cloned(),
            );
            draft.entries = next;
            Ok(())
        })
        .await?;

        self.inner.virtual_pages.store(0, Ordering::SeqCst);
        self.emit(StoreEvent::Reordered);
        Ok(())
    }

    /// Bulk add after a quota precheck
    ///
    /// Every link is validated first; one invalid link refuses the whole
    /// import. A refused precheck writes nothing.
    pub async fn import_items(&self, items: Vec<NewLink>) -> StoreResult<ImportReport> {
        let links = items
            .into_iter()
            .map(NewLink::into_link)
            .collect::<Result<Vec<Link>, ValidationError>>()?;

        let precheck = self.precheck_import(&links).await;
        if !precheck.ok {
            warn!(
                "Import of {} links refused: {:?} ({} > {} bytes)",
                links.len(),
                precheck.error_code,
                precheck.projected_bytes,
                precheck.quota_bytes
            );
            return Ok(ImportReport {
                precheck,
                item_ids: Vec::new(),
            });
        }

        let item_ids: Vec<String> = links.iter().map(|l| l.id.clone()).collect();
        let incoming_tags: Vec<String> = links.iter().flat_map(|l| l.tags.clone()).collect();
        let payloads = links.into_iter().map(ItemPayload::from);

        self.run(CommitRequest::with_items().set_items(payloads), |draft| {
            draft
                .entries
                .extend(item_ids.iter().map(|id| Entry::Item(id.clone())));
            draft.merge_tags(&incoming_tags);
            Apply::Commit(())
        })
        .await?;

        info!("Imported {} links", item_ids.len());
        self.emit(StoreEvent::ItemsBulkAdded {
            item_ids: item_ids.clone(),
        });
        Ok(ImportReport { precheck, item_ids })
    }

    /// Project the area usage after importing `links`, without writing
    pub async fn precheck_import(&self, links: &[Link]) -> QuotaPrecheck {
        let engine = &self.inner.engine;
        let snapshot = match engine.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Import precheck could not read state: {}", e);
                return QuotaPrecheck::failed(
                    QuotaErrorCode::SyncQuotaPrecheckFailed,
                    0,
                    engine.storage().quota().total_bytes,
                );
            }
        };

        let mut items = snapshot.items;
        let mut entry_list = snapshot.entries;
        let mut incoming_tags = Vec::new();
        for link in links {
            items.insert(link.id.clone(), link.clone().into());
            entry_list.push(Entry::Item(link.id.clone()));
            incoming_tags.extend(link.tags.iter().cloned());
        }
        let entry_list = entries::ensure_system_entries(&entries::normalize(&entry_list));

        let mut structure = StorageMap::new();
        structure.insert(keys::ITEMS.to_string(), entries::to_value(&entry_list));
        structure.insert(
            keys::TAGS.to_string(),
            Value::from(tags::merge_into_library(&snapshot.tags, &incoming_tags)),
        );
        structure.insert(
            keys::REVISION.to_string(),
            Value::String(RevisionToken::generate().to_string()),
        );
        structure.insert(
            keys::ACTIVE_CHUNK_SET.to_string(),
            Value::String(chunks::new_chunk_set_id()),
        );

        let config = engine.config();
        let limits = ChunkLimits {
            budget_bytes: config.chunk_budget_bytes,
            per_item_quota_bytes: config.per_item_quota_bytes,
        };
        quota::precheck(engine.storage().as_ref(), &items, &structure, limits).await
    }

    /// Set the title or icon override of a system tile
    pub async fn update_system_item(&self, item: SystemItem) -> StoreResult<()> {
        if !is_system_id(&item.id) {
            return Err(ValidationError::InvalidId(item.id).into());
        }
        if let Some(ref title) = item.title {
            check_len("title", title, MAX_TITLE_LEN)?;
        }
        if let Some(ref icon) = item.icon {
            check_len("icon", icon, MAX_ICON_LEN)?;
        }

        let id = item.id.clone();
        let (_, committed) = self
            .mutate(CommitRequest::structure(), |draft| {
                draft.system_items.insert(item.id.clone(), item.clone());
                Ok(())
            })
            .await?;
        if committed {
            self.emit(StoreEvent::ItemUpdated { item_id: id });
        }
        Ok(())
    }

    // ==================== Pages ====================

    /// Open an empty page at the end; returns its index
    pub fn add_page(&self) -> usize {
        let page = self.get_page_count();
        self.inner.virtual_pages.fetch_add(1, Ordering::SeqCst);
        self.emit(StoreEvent::PageAdded { page });
        page
    }

    /// Merge page `page` into its neighbour
    ///
    /// Items are never deleted. Returns false when the page does not exist
    /// or only exists because the page before it is full.
    pub async fn remove_page(&self, page: usize) -> StoreResult<bool> {
        let real_pages = {
            let cache = self.cache();
            entries::page_count(&cache.entries, cache.settings.page_size)
        };

        if page >= real_pages {
            if page < real_pages + self.virtual_pages() {
                self.consume_virtual_page();
                self.emit(StoreEvent::PageRemoved { page });
                return Ok(true);
            }
            return Ok(false);
        }

        let outcome = self
            .run(CommitRequest::structure(), |draft| {
                match entries::remove_page(&draft.entries, page, draft.page_size()) {
                    Some(next) => {
                        draft.entries = next;
                        Apply::Commit(true)
                    }
                    None => Apply::Abort(false),
                }
            })
            .await?;

        if outcome.value {
            self.emit(StoreEvent::PageRemoved { page });
        }
        Ok(outcome.value)
    }

    /// Number of pages, virtual ones included
    pub fn get_page_count(&self) -> usize {
        let cache = self.cache();
        entries::page_count(&cache.entries, cache.settings.page_size) + self.virtual_pages()
    }

    /// Resolved contents of one page
    ///
    /// Entries without a payload are left out.
    pub fn get_page(&self, index: usize) -> Vec<PageItem> {
        let cache = self.cache();
        let pages = entries::paginate(&cache.entries, cache.settings.page_size);
        let Some(page) = pages.get(index) else {
            return Vec::new();
        };

        page.iter()
            .filter_map(|entry| match entry {
                Entry::Item(id) => cache.link(id).cloned().map(PageItem::Link),
                Entry::Folder(id) => cache.folder(id).map(|folder| PageItem::Folder {
                    folder: folder.clone(),
                    children: folder
                        .children
                        .iter()
                        .filter_map(|c| cache.link(c).cloned())
                        .collect(),
                }),
                Entry::System(id) => Some(PageItem::System(
                    cache
                        .system_items
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| SystemItem::new(id.clone())),
                )),
                Entry::PageBreak => None,
            })
            .collect()
    }

    pub fn get_item(&self, id: &str) -> Option<ItemPayload> {
        self.cache().items.get(id).cloned()
    }

    pub fn get_folder(&self, id: &str) -> Option<Folder> {
        self.cache().folder(id).cloned()
    }

    /// Folder holding `id`, if any
    pub fn parent_folder(&self, id: &str) -> Option<Folder> {
        self.cache().folder_of(id).cloned()
    }

    /// Search titles and URLs, or tags with `#tag`
    ///
    /// Links inside folders are searched too; a plain query also matches
    /// folder titles. Results follow the page order.
    pub fn search(&self, query: &str) -> Vec<ItemPayload> {
        let cache = self.cache();
        let tag = tags::tag_query(query);
        let needle = query.trim().to_lowercase();
        if tag.is_none() && needle.is_empty() {
            return Vec::new();
        }

        let matches = |link: &Link| match tag {
            Some(tag) => link.has_tag(tag),
            None => {
                link.title.to_lowercase().contains(&needle)
                    || link.url.to_lowercase().contains(&needle)
            }
        };

        let mut hits = Vec::new();
        for entry in &cache.entries {
            match entry {
                Entry::Item(id) => {
                    if let Some(link) = cache.link(id).filter(|l| matches(l)) {
                        hits.push(ItemPayload::Link(link.clone()));
                    }
                }
                Entry::Folder(id) => {
                    let Some(folder) = cache.folder(id) else {
                        continue;
                    };
                    if tag.is_none() && folder.title.to_lowercase().contains(&needle) {
                        hits.push(ItemPayload::Folder(folder.clone()));
                    }
                    hits.extend(
                        folder
                            .children
                            .iter()
                            .filter_map(|c| cache.link(c))
                            .filter(|l| matches(l))
                            .map(|l| ItemPayload::Link(l.clone())),
                    );
                }
                Entry::System(_) | Entry::PageBreak => {}
            }
        }
        hits
    }

    // ==================== Folders ====================

    pub async fn create_folder(
        &self,
        title: &str,
        child_ids: &[String],
        position: Option<Position>,
    ) -> StoreResult<Folder> {
        let (folder, _) = self
            .mutate(CommitRequest::with_items(), |draft| {
                folders::create_folder(draft, title, child_ids, position)
            })
            .await?;

        self.emit(StoreEvent::FolderCreated {
            folder_id: folder.id.clone(),
            child_ids: folder.children.clone(),
        });
        Ok(folder)
    }

    /// Returns false when the link was already in the folder
    pub async fn add_to_folder(&self, folder_id: &str, item_id: &str) -> StoreResult<bool> {
        let (added, _) = self
            .mutate(CommitRequest::with_items(), |draft| {
                folders::add_to_folder(draft, folder_id, item_id)
            })
            .await?;

        if added {
            self.emit(StoreEvent::FolderChanged {
                folder_id: folder_id.to_string(),
                action: FolderAction::Added,
            });
        }
        Ok(added)
    }

    pub async fn remove_from_folder(
        &self,
        folder_id: &str,
        item_id: &str,
        position: Option<Position>,
    ) -> StoreResult<FolderAction> {
        let (action, _) = self
            .mutate(CommitRequest::with_items(), |draft| {
                folders::remove_from_folder(draft, folder_id, item_id, position)
            })
            .await?;

        self.emit(StoreEvent::FolderChanged {
            folder_id: folder_id.to_string(),
            action,
        });
        Ok(action)
    }

    /// Drop `dragged` onto `target`
    pub async fn merge_items_into_folder(
        &self,
        dragged: &str,
        target: &str,
    ) -> StoreResult<MergeOutcome> {
        let (merged, _) = self
            .mutate(CommitRequest::with_items(), |draft| {
                folders::merge_into_folder(draft, dragged, target)
            })
            .await?;

        if merged.created {
            let child_ids = self
                .get_folder(&merged.folder_id)
                .map(|f| f.children)
                .unwrap_or_default();
            self.emit(StoreEvent::FolderCreated {
                folder_id: merged.folder_id.clone(),
                child_ids,
            });
        } else {
            self.emit(StoreEvent::FolderChanged {
                folder_id: merged.folder_id.clone(),
                action: FolderAction::Added,
            });
        }
        Ok(merged)
    }

    /// Delete a folder; returns the children deleted or released
    pub async fn delete_folder(&self, folder_id: &str, mode: DeleteMode) -> StoreResult<Vec<String>> {
        let (children, _) = self
            .mutate(CommitRequest::with_items(), |draft| {
                folders::delete_folder(draft, folder_id, mode)
            })
            .await?;

        self.emit(StoreEvent::FolderDeleted {
            folder_id: folder_id.to_string(),
        });
        Ok(children)
    }

    pub async fn rename_folder(&self, folder_id: &str, title: &str) -> StoreResult<()> {
        let (_, committed) = self
            .mutate(CommitRequest::with_items(), |draft| {
                folders::rename_folder(draft, folder_id, title)
            })
            .await?;

        if committed {
            self.emit(StoreEvent::FolderChanged {
                folder_id: folder_id.to_string(),
                action: FolderAction::Renamed,
            });
        }
        Ok(())
    }

    pub async fn reorder_folder_children(
        &self,
        folder_id: &str,
        ordered: &[String],
    ) -> StoreResult<Vec<String>> {
        let (children, committed) = self
            .mutate(CommitRequest::with_items(), |draft| {
                folders::reorder_folder_children(draft, folder_id, ordered)
            })
            .await?;

        if committed {
            self.emit(StoreEvent::FolderChanged {
                folder_id: folder_id.to_string(),
                action: FolderAction::Reordered,
            });
        }
        Ok(children)
    }

    // ==================== Dock ====================

    /// Links shown in the dock
    pub fn dock(&self) -> Vec<Link> {
        let cache = self.cache();
        dock::visible_pins(&cache)
            .iter()
            .filter_map(|id| cache.link(id).cloned())
            .collect()
    }

    pub async fn pin_to_dock(&self, id: &str) -> StoreResult<PinOutcome> {
        let outcome = self
            .run(CommitRequest::with_items(), |draft| {
                let result = dock::pin(draft, id);
                if result.is_ok() {
                    Apply::Commit(result)
                } else {
                    Apply::Abort(result)
                }
            })
            .await?;

        if let PinOutcome::Rejected { reason } = outcome.value {
            debug!("Pin of {} rejected: {}", id, reason);
        }
        Ok(outcome.value)
    }

    /// Returns false when `id` was not pinned
    pub async fn unpin_from_dock(&self, id: &str) -> StoreResult<bool> {
        let outcome = self
            .run(CommitRequest::structure(), |draft| {
                if dock::unpin(draft, id) {
                    Apply::Commit(true)
                } else {
                    Apply::Abort(false)
                }
            })
            .await?;
        Ok(outcome.value)
    }

    /// Apply the dock order shown on screen; returns the stored pin list
    pub async fn reorder_dock(&self, ordered: &[String]) -> StoreResult<Vec<String>> {
        let outcome = self
            .run(CommitRequest::with_items(), |draft| {
                Apply::Commit(dock::reorder(draft, ordered))
            })
            .await?;
        Ok(outcome.value)
    }

    // ==================== Tags ====================

    pub fn tags(&self) -> Vec<String> {
        self.cache().tags.clone()
    }

    /// Add a tag to the library; false if present, empty or the library is full
    pub async fn add_tag(&self, tag: &str) -> StoreResult<bool> {
        let tag = tags::normalize_item_tags(&[tag.to_string()])?;
        if tag.is_empty() {
            return Ok(false);
        }
        let (_, committed) = self
            .mutate(CommitRequest::structure(), |draft| {
                draft.merge_tags(&tag);
                Ok(())
            })
            .await?;
        Ok(committed)
    }

    /// Remove a tag from the library and from every link
    pub async fn remove_tag(&self, tag: &str) -> StoreResult<bool> {
        let (_, committed) = self
            .mutate(CommitRequest::with_items(), |draft| {
                draft.tags = tags::remove_tag(&draft.tags, tag);
                for payload in draft.items.values_mut() {
                    if let ItemPayload::Link(link) = payload {
                        if link.has_tag(tag) {
                            link.tags = tags::remove_tag(&link.tags, tag);
                        }
                    }
                }
                Ok(())
            })
            .await?;
        Ok(committed)
    }

    /// Rename a tag in the library and on every link
    pub async fn rename_tag(&self, from: &str, to: &str) -> StoreResult<bool> {
        let to = tags::normalize_item_tags(&[to.to_string()])?;
        let Some(to) = to.first() else {
            return Ok(false);
        };

        let (_, committed) = self
            .mutate(CommitRequest::with_items(), |draft| {
                draft.tags = tags::rename_tag(&draft.tags, from, to);
                for payload in draft.items.values_mut() {
                    if let ItemPayload::Link(link) = payload {
                        if link.has_tag(from) {
                            link.tags = tags::rename_tag(&link.tags, from, to);
                        }
                    }
                }
                Ok(())
            })
            .await?;
        Ok(committed)
    }

    // ==================== Settings ====================

    pub async fn set_dock_capacity(&self, capacity: usize) -> StoreResult<Settings> {
        self.change_settings(|settings| settings.dock_capacity = capacity)
            .await
    }

    pub async fn set_page_size(&self, page_size: usize) -> StoreResult<Settings> {
        self.change_settings(|settings| settings.page_size = page_size)
            .await
    }

    async fn change_settings<F>(&self, change: F) -> StoreResult<Settings>
    where
        F: Fn(&mut Settings) + Send,
    {
        let outcome = self
            .run(CommitRequest::structure(), move |draft| {
                change(&mut draft.settings);
                Apply::Commit(())
            })
            .await?;

        let settings = outcome.snapshot.settings;
        if outcome.committed {
            self.emit(StoreEvent::SettingsChanged { settings });
        }
        Ok(settings)
    }

    // ==================== Sync ====================

    /// React to a change written to the storage area
    ///
    /// Echoes of this store's own commits are ignored. Returns what was done.
    pub async fn handle_storage_change(&self, change: &StorageChange) -> StoreResult<ChangeAction> {
        let action = {
            let mut revisions = self.inner.engine.revisions();
            classify(change, &mut revisions)
        };

        match action {
            ChangeAction::Ignore | ChangeAction::SelfEcho => {}
            ChangeAction::FullReload => {
                debug!("Foreign commit changed the structure; reloading");
                self.reload().await?;
                self.emit(StoreEvent::Reordered);
            }
            ChangeAction::DockOnly => {
                let fresh = self.inner.engine.read_snapshot(false).await?;
                let pins = {
                    let mut cache = self.cache_mut();
                    cache.dock_pins = fresh.dock_pins;
                    cache.revision = fresh.revision;
                    dock::visible_pins(&cache)
                };
                self.emit(StoreEvent::DockChanged { pins });
            }
            ChangeAction::TagsOnly => {
                let fresh = self.inner.engine.read_snapshot(false).await?;
                let tags = {
                    let mut cache = self.cache_mut();
                    cache.tags = fresh.tags;
                    cache.revision = fresh.revision;
                    cache.tags.clone()
                };
                self.emit(StoreEvent::TagsChanged { tags });
            }
            ChangeAction::SettingsOnly => {
                let fresh = self.inner.engine.read_snapshot(false).await?;
                {
                    let mut cache = self.cache_mut();
                    cache.settings = fresh.settings;
                    cache.revision = fresh.revision;
                }
                self.emit(StoreEvent::SettingsChanged {
                    settings: fresh.settings,
                });
            }
        }
        Ok(action)
    }

    /// Follow the storage area's change notifications in a background task
    ///
    /// Runs until the area's channel closes; abort the handle to stop early.
    pub fn spawn_change_listener(&self) -> JoinHandle<()> {
        let mut changes = self.storage().subscribe();
        let store = self.clone();

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if let Err(e) = store.handle_storage_change(&change).await {
                            warn!("Failed to apply storage change: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} storage changes; reloading", missed);
                        match store.reload().await {
                            Ok(()) => store.emit(StoreEvent::Reordered),
                            Err(e) => warn!("Reload failed: {}", e),
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Storage change listener stopped");
        })
    }

    /// Remove chunk sets that are no longer active and older than the
    /// grace period
    pub async fn collect_obsolete_chunks(&self) -> StoreResult<Vec<String>> {
        Ok(self.inner.engine.collect_obsolete_chunks().await?)
    }

    /// Repair inconsistencies now, in one commit
    pub async fn repair_now(&self) -> StoreResult<RepairReport> {
        let outcome = self
            .run(CommitRequest::with_items(), |draft| {
                let report = repair::repair(draft);
                if report.is_clean() {
                    Apply::Abort(report)
                } else {
                    Apply::Commit(report)
                }
            })
            .await?;

        if outcome.committed {
            self.emit(StoreEvent::Reordered);
        }
        Ok(outcome.value)
    }

    fn spawn_repair(&self) {
        if self.inner.repairing.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.repair_now().await {
                warn!("Background repair failed: {}", e);
            }
            store.inner.repairing.store(false, Ordering::SeqCst);
        });
    }
}

/// Place `entry` in the draft
///
/// When virtual pages exist, an append or a target past the last real page
/// starts a new page. Returns true if a virtual page was used up.
fn place(draft: &mut CommitDraft, entry: Entry, position: Option<Position>, virtual_pages: usize) -> bool {
    let real_pages = entries::page_count(&draft.entries, draft.page_size());
    let on_new_page = virtual_pages > 0
        && match position {
            None => true,
            Some(position) => position.page >= real_pages,
        };

    if on_new_page {
        draft.entries = entries::append_on_new_page(&draft.entries, entry);
    } else {
        draft.insert_entry(entry, position);
    }
    on_new_page
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PAGE_BREAK;

    fn draft(raw: &[&str], page_size: usize) -> CommitDraft {
        let mut snapshot = Snapshot::empty(Settings {
            dock_capacity: 8,
            page_size,
        });
        snapshot.entries = raw.iter().filter_map(|s| Entry::parse(s)).collect();
        CommitDraft::new(snapshot)
    }

    fn ids(draft: &CommitDraft) -> Vec<&str> {
        draft.entries.iter().map(Entry::as_str).collect()
    }

    #[test]
    fn test_place_without_virtual_pages() {
        let mut d = draft(&["qlink_a", "qlink_b"], 2);
        assert!(!place(&mut d, Entry::Item("qlink_c".to_string()), None, 0));
        assert_eq!(ids(&d), vec!["qlink_a", "qlink_b", "qlink_c"]);
    }

    #[test]
    fn test_place_on_virtual_page() {
        let mut d = draft(&["qlink_a"], 4);
        assert!(place(&mut d, Entry::Item("qlink_b".to_string()), None, 1));
        assert_eq!(ids(&d), vec!["qlink_a", PAGE_BREAK, "qlink_b"]);

        let mut d = draft(&["qlink_a"], 4);
        let on_page_zero = Some(Position::new(0, 0));
        assert!(!place(&mut d, Entry::Item("qlink_b".to_string()), on_page_zero, 1));
        assert_eq!(ids(&d), vec!["qlink_b", "qlink_a"]);
    }
}
