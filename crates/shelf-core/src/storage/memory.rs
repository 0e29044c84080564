use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::error::{StorageError, StorageResult};
use super::{diff_write, entry_size, StorageChange, StorageMap, StorageQuota, SyncStorage};

/// In-memory sync area.
///
/// Several `Store`s can share one `Arc<MemoryStorage>` to behave like tabs
/// of the same profile: every write is broadcast to all subscribers.
/// Quota limits are enforced the same way the browser area enforces them,
/// and write failures can be injected to exercise retry paths.
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Value>>,
    quota: StorageQuota,
    changes: broadcast::Sender<StorageChange>,
    injected_failures: Mutex<VecDeque<String>>,
    write_count: AtomicUsize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::with_quota(StorageQuota::default())
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: StorageQuota) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            data: Mutex::new(HashMap::new()),
            quota,
            changes,
            injected_failures: Mutex::new(VecDeque::new()),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` writes fail with `message`.
    pub fn fail_next_writes(&self, count: usize, message: &str) {
        let mut failures = lock(&self.injected_failures);
        for _ in 0..count {
            failures.push_back(message.to_string());
        }
    }

    /// Number of successful `set`/`remove` calls so far.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Raw value of one key (test helper).
    pub fn peek(&self, key: &str) -> Option<Value> {
        lock(&self.data).get(key).cloned()
    }

    /// Write a raw value without quota checks or notifications (test helper).
    pub fn seed(&self, key: &str, value: Value) {
        lock(&self.data).insert(key.to_string(), value);
    }

    fn take_injected_failure(&self) -> Option<StorageError> {
        lock(&self.injected_failures)
            .pop_front()
            .map(StorageError::from_message)
    }

    fn check_quota(&self, data: &HashMap<String, Value>, values: &StorageMap) -> StorageResult<()> {
        for (key, value) in values {
            let size = entry_size(key, value);
            if size > self.quota.per_item_bytes {
                return Err(StorageError::QuotaExceeded {
                    key: Some(key.clone()),
                    details: format!(
                        "QUOTA_BYTES_PER_ITEM quota exceeded ({} > {} bytes)",
                        size, self.quota.per_item_bytes
                    ),
                });
            }
        }

        let projected: usize = data
            .iter()
            .filter(|(key, _)| !values.contains_key(*key))
            .map(|(k, v)| entry_size(k, v))
            .chain(values.iter().map(|(k, v)| entry_size(k, v)))
            .sum();
        if projected > self.quota.total_bytes {
            return Err(StorageError::QuotaExceeded {
                key: None,
                details: format!(
                    "QUOTA_BYTES quota exceeded ({} > {} bytes)",
                    projected, self.quota.total_bytes
                ),
            });
        }
        Ok(())
    }

    fn publish(&self, change: StorageChange) {
        if !change.is_empty() {
            // No receivers is fine
            let _ = self.changes.send(change);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl SyncStorage for MemoryStorage {
    async fn get(&self, keys: &[&str]) -> StorageResult<StorageMap> {
        let data = lock(&self.data);
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> StorageResult<StorageMap> {
        Ok(lock(&self.data).clone())
    }

    async fn set(&self, values: StorageMap) -> StorageResult<()> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let change = {
            let mut data = lock(&self.data);
            self.check_quota(&data, &values)?;
            let change = diff_write(&data, &values);
            data.extend(values);
            change
        };

        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.publish(change);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> StorageResult<()> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let change = {
            let mut data = lock(&self.data);
            let changes = keys
                .iter()
                .filter_map(|key| {
                    data.remove(key).map(|old| {
                        (
                            key.clone(),
                            super::ValueChange {
                                old_value: Some(old),
                                new_value: None,
                            },
                        )
                    })
                })
                .collect();
            StorageChange { changes }
        };

        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.publish(change);
        Ok(())
    }

    fn quota(&self) -> StorageQuota {
        self.quota
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
