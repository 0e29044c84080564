//! Commit locks
//!
//! Named exclusive locks that serialize commits across stores sharing one
//! process, plus a no-op provider for areas without lock support.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of one commit; released on drop
pub struct ScopedLock {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl ScopedLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLock").field("name", &self.name).finish()
    }
}

/// Cross-tab mutual exclusion capability
///
/// `None` means "no coordination available": the caller proceeds
/// uncoordinated rather than failing.
#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn try_acquire(&self, name: &str) -> Option<ScopedLock>;
}

/// Provider used when the environment has no lock primitive
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocks;

#[async_trait]
impl LockProvider for NoopLocks {
    async fn try_acquire(&self, _name: &str) -> Option<ScopedLock> {
        None
    }
}

/// Process-wide named locks shared by every store holding a clone
///
/// Acquisition waits until the current holder releases the lock.
#[derive(Debug, Default, Clone)]
pub struct NamedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl LockProvider for NamedLocks {
    async fn try_acquire(&self, name: &str) -> Option<ScopedLock> {
        let guard = self.lock_for(name).lock_owned().await;
        Some(ScopedLock {
            name: name.to_string(),
            _guard: guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_noop_locks_never_coordinate() {
        assert!(NoopLocks.try_acquire("commit").await.is_none());
    }

    #[tokio::test]
    async fn test_named_locks_are_exclusive_per_name() {
        let locks = NamedLocks::new();
        let held = locks.try_acquire("commit").await.unwrap();
        assert_eq!(held.name(), "commit");

        // Other names are independent
        assert!(locks.try_acquire("other").await.is_some());

        let shared = locks.clone();
        let waiter = tokio::spawn(async move { shared.try_acquire("commit").await.is_some() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap());
    }
}
