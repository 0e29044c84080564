//! Storage layer
//!
//! Abstracts the quota-limited key/value sync area that every tab shares.
//!
//! ## Architecture
//!
//! - **`SyncStorage`**: async get/set/remove over JSON values, plus a change
//!   feed so other tabs can react to writes
//! - **`MemoryStorage`**: in-process area shared by several `Store`s (tabs)
//! - **`SqliteStorage`**: persistent area backed by a single SQLite table
//!
//! Writes are atomic per `set` call: a reader sees either all of the keys of
//! one call or none of them.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use schema::{migrate, SCHEMA_VERSION};
pub use sqlite::SqliteStorage;

/// Keys of the persisted structure
pub mod keys {
    /// Flat entry list
    pub const ITEMS: &str = "items";
    /// Ordered dock pins
    pub const DOCK_PINS: &str = "dockPins";
    /// Tag library
    pub const TAGS: &str = "tags";
    /// Revision token of the last commit
    pub const REVISION: &str = "storageRevision";
    /// Id of the chunk set holding item payloads
    pub const ACTIVE_CHUNK_SET: &str = "activeChunkSetId";
    /// Dock capacity and page size
    pub const SETTINGS: &str = "settings";

    /// All structure keys read at the start of a commit
    pub const STRUCTURE: [&str; 6] = [ITEMS, DOCK_PINS, TAGS, REVISION, ACTIVE_CHUNK_SET, SETTINGS];
}

/// Key/value snapshot as returned by `get`
pub type StorageMap = HashMap<String, Value>;

/// Old and new value of a single key
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// One change notification, covering every key touched by one write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageChange {
    pub changes: HashMap<String, ValueChange>,
}

impl StorageChange {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    /// New value of `key` if this change set wrote it
    pub fn new_value(&self, key: &str) -> Option<&Value> {
        self.changes.get(key).and_then(|c| c.new_value.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }
}

/// Size limits enforced by a sync area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageQuota {
    /// Maximum estimated size of one key + value
    pub per_item_bytes: usize,
    /// Maximum estimated size of the whole area
    pub total_bytes: usize,
}

/// Browser sync storage limits (`QUOTA_BYTES_PER_ITEM`, `QUOTA_BYTES`)
pub const QUOTA_BYTES_PER_ITEM: usize = 8_192;
pub const QUOTA_BYTES: usize = 102_400;

impl Default for StorageQuota {
    fn default() -> Self {
        Self {
            per_item_bytes: QUOTA_BYTES_PER_ITEM,
            total_bytes: QUOTA_BYTES,
        }
    }
}

impl StorageQuota {
    /// No limits (local-only areas)
    pub fn unlimited() -> Self {
        Self {
            per_item_bytes: usize::MAX,
            total_bytes: usize::MAX,
        }
    }
}

/// Estimated bytes a key/value pair occupies in the sync area
///
/// Matches how the area accounts for quota: key length plus the length of
/// the compact JSON encoding of the value.
pub fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}

/// A quota-limited key/value area shared between tabs
#[async_trait]
pub trait SyncStorage: Send + Sync {
    /// Read the given keys; missing keys are absent from the result
    async fn get(&self, keys: &[&str]) -> StorageResult<StorageMap>;

    /// Read every key in the area
    async fn get_all(&self) -> StorageResult<StorageMap>;

    /// Write all values in one atomic step
    async fn set(&self, values: StorageMap) -> StorageResult<()>;

    /// Remove keys; unknown keys are ignored
    async fn remove(&self, keys: &[String]) -> StorageResult<()>;

    /// List every key in the area
    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.get_all().await?.into_keys().collect())
    }

    /// Estimated bytes currently used
    async fn bytes_in_use(&self) -> StorageResult<usize> {
        Ok(self
            .get_all()
            .await?
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }

    /// Limits this area enforces
    fn quota(&self) -> StorageQuota;

    /// Subscribe to change notifications for every write, including our own
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Compute the change set produced by writing `values` over `current`
///
/// Keys whose value does not change are left out.
pub(crate) fn diff_write(current: &HashMap<String, Value>, values: &StorageMap) -> StorageChange {
    let changes = values
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| {
            (
                key.clone(),
                ValueChange {
                    old_value: current.get(key).cloned(),
                    new_value: Some(value.clone()),
                },
            )
        })
        .collect();
    StorageChange { changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_size_matches_compact_json() {
        assert_eq!(entry_size("items", &json!(["qlink_a"])), 5 + 11);
        assert_eq!(entry_size("k", &json!({"a": 1})), 1 + 7);
    }

    #[test]
    fn test_diff_write_skips_unchanged() {
        let mut current = HashMap::new();
        current.insert("a".to_string(), json!(1));
        current.insert("b".to_string(), json!(2));

        let mut values = StorageMap::new();
        values.insert("a".to_string(), json!(1));
        values.insert("b".to_string(), json!(3));
        values.insert("c".to_string(), json!(4));

        let change = diff_write(&current, &values);
        assert!(!change.contains("a"));
        assert_eq!(change.new_value("b"), Some(&json!(3)));
        assert_eq!(change.changes["b"].old_value, Some(json!(2)));
        assert_eq!(change.changes["c"].old_value, None);
    }
}
