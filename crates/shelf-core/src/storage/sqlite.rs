//! SQLite-backed sync area
//!
//! Persists the area to a single `kv` table. Each `set` or `remove` runs in
//! one transaction, so a write is all-or-nothing just like the browser area.
//! Change notifications are delivered to subscribers in this process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::migrate;
use super::{
    diff_write, entry_size, StorageChange, StorageMap, StorageQuota, SyncStorage, ValueChange,
};
use crate::models::now_millis;

/// Persistent sync area
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    quota: StorageQuota,
    changes: broadcast::Sender<StorageChange>,
}

impl SqliteStorage {
    /// Open or create the database at `path`
    pub fn open(path: &Path, quota: StorageQuota) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        debug!("Opened sync area at {:?}", path);
        Self::from_connection(conn, quota)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(quota: StorageQuota) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, quota)
    }

    fn from_connection(conn: Connection, quota: StorageQuota) -> StorageResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(2))?;
        migrate(&conn)?;

        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            conn: Mutex::new(conn),
            quota,
            changes,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_value(conn: &Connection, key: &str) -> StorageResult<Option<Value>> {
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(match raw {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        })
    }

    fn read_all(conn: &Connection) -> StorageResult<HashMap<String, Value>> {
        let mut stmt = conn.prepare("SELECT key, value FROM kv")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut all = HashMap::new();
        for row in rows {
            let (key, raw) = row?;
            all.insert(key, serde_json::from_str(&raw)?);
        }
        Ok(all)
    }

    fn check_quota(&self, current: &HashMap<String, Value>, values: &StorageMap) -> StorageResult<()> {
        for (key, value) in values {
            let size = entry_size(key, value);
            if size > self.quota.per_item_bytes {
                return Err(StorageError::QuotaExceeded {
                    key: Some(key.clone()),
                    details: format!("{} > {} bytes", size, self.quota.per_item_bytes),
                });
            }
        }

        if self.quota.total_bytes == usize::MAX {
            return Ok(());
        }
        let projected: usize = current
            .iter()
            .filter(|(key, _)| !values.contains_key(*key))
            .map(|(k, v)| entry_size(k, v))
            .chain(values.iter().map(|(k, v)| entry_size(k, v)))
            .sum();
        if projected > self.quota.total_bytes {
            return Err(StorageError::QuotaExceeded {
                key: None,
                details: format!("{} > {} bytes", projected, self.quota.total_bytes),
            });
        }
        Ok(())
    }

    fn publish(&self, change: StorageChange) {
        if !change.is_empty() {
            let _ = self.changes.send(change);
        }
    }
}

#[async_trait]
impl SyncStorage for SqliteStorage {
    async fn get(&self, keys: &[&str]) -> StorageResult<StorageMap> {
        let conn = self.conn();
        let mut found = StorageMap::new();
        for key in keys {
            if let Some(value) = Self::read_value(&conn, key)? {
                found.insert(key.to_string(), value);
            }
        }
        Ok(found)
    }

    async fn get_all(&self) -> StorageResult<StorageMap> {
        Self::read_all(&self.conn())
    }

    async fn set(&self, values: StorageMap) -> StorageResult<()> {
        let change = {
            let mut conn = self.conn();
            let current = Self::read_all(&conn)?;
            self.check_quota(&current, &values)?;
            let change = diff_write(&current, &values);

            let tx = conn.transaction()?;
            let now = now_millis();
            for (key, value) in &values {
                let raw = value.to_string();
                let size = (key.len() + raw.len()) as i64;
                tx.execute(
                    "INSERT OR REPLACE INTO kv (key, value, updated_at, size_bytes) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, raw, now, size],
                )?;
            }
            tx.commit()?;
            change
        };

        self.publish(change);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> StorageResult<()> {
        let change = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let mut changes = HashMap::new();
            for key in keys {
                if let Some(old) = Self::read_value(&tx, key)? {
                    tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
                    changes.insert(
                        key.clone(),
                        ValueChange {
                            old_value: Some(old),
                            new_value: None,
                        },
                    );
                }
            }
            tx.commit()?;
            StorageChange { changes }
        };

        self.publish(change);
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    async fn bytes_in_use(&self) -> StorageResult<usize> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM kv",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as usize)
    }

    fn quota(&self) -> StorageQuota {
        self.quota
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
