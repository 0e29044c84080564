//! Shelf Core Library
//!
//! Persistence and consistency engine for a paginated launchpad of
//! shortcuts: links, folders of links, a dock of pinned links and a tag
//! library, stored in a small quota-limited key/value area that several
//! tabs share.
//!
//! # Architecture
//!
//! - **Entry list**: one flat, ordered list of ids and page breaks; pages are
//!   derived from it, never stored
//! - **Chunk sets**: item payloads are packed into size-bounded chunks; a
//!   commit writes a brand new set and then swaps the pointer to it
//! - **Commit engine**: every mutation is one serialized read-modify-write
//!   cycle with retries for transient failures
//! - **Sync**: optional named locks across tabs, revision tokens to spot
//!   the echo of our own writes
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open_with_config(&Config::load()?).await?;
//!
//! // Add a link
//! let link = store.add_item(NewLink::new("https://example.com"), None).await?;
//!
//! // Read the first page
//! let page = store.get_page(0);
//! ```
//!
//! # Modules
//!
//! - `store`: Facade over everything below (main entry point)
//! - `models`: Links, folders, system items and entry ids
//! - `entries`: Pagination and ordering of the flat entry list
//! - `chunks`: Chunk set packing and reading
//! - `commit`: Commit engine
//! - `sync`: Cross-tab locks, revision tokens and change classification
//! - `folders` / `dock` / `tags`: Apply-step operations
//! - `repair`: Detection and repair of dangling references
//! - `quota`: Quota precheck for bulk imports
//! - `storage`: Sync area trait and backends
//! - `config`: Application configuration

pub mod chunks;
pub mod commit;
pub mod config;
pub mod dock;
pub mod entries;
pub mod error;
pub mod events;
pub mod folders;
pub mod models;
pub mod quota;
pub mod repair;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tags;

pub use commit::{Apply, CommitDraft, CommitEngine, CommitError, CommitRequest, Settings, Snapshot};
pub use config::{Config, EngineConfig};
pub use dock::{PinOutcome, PinRejection};
pub use entries::Position;
pub use error::{StoreError, StoreResult, ValidationError};
pub use events::{FolderAction, StoreEvent};
pub use folders::{DeleteMode, MergeOutcome};
pub use models::{Entry, Folder, ItemPayload, Link, LinkUpdate, NewLink, SystemItem};
pub use quota::{QuotaErrorCode, QuotaPrecheck};
pub use repair::RepairReport;
pub use storage::{MemoryStorage, SqliteStorage, StorageError, StorageQuota, SyncStorage};
pub use store::{ImportReport, PageItem, Store};
pub use sync::{LockProvider, NamedLocks, NoopLocks};
