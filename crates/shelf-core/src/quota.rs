//! Quota precheck for bulk writes
//!
//! A bulk import is simulated before it is committed: the post-import item
//! map is packed exactly as a commit would pack it, and the peak usage is
//! compared against the area's quota. During a commit the old and the new
//! chunk set coexist until cleanup, so both count.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunks::{self, ChunkLimits, ItemMap};
use crate::storage::{entry_size, StorageMap, SyncStorage};

/// Typed failure codes of a precheck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaErrorCode {
    /// The write would not fit
    SyncQuotaExceeded,
    /// Current usage could not be measured
    SyncQuotaPrecheckFailed,
}

impl std::fmt::Display for QuotaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaErrorCode::SyncQuotaExceeded => f.write_str("SYNC_QUOTA_EXCEEDED"),
            QuotaErrorCode::SyncQuotaPrecheckFailed => f.write_str("SYNC_QUOTA_PRECHECK_FAILED"),
        }
    }
}

/// Outcome of a precheck
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPrecheck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<QuotaErrorCode>,
    /// Estimated peak bytes in use while the write is applied
    pub projected_bytes: usize,
    pub quota_bytes: usize,
}

impl QuotaPrecheck {
    pub fn failed(code: QuotaErrorCode, projected_bytes: usize, quota_bytes: usize) -> Self {
        Self {
            ok: false,
            error_code: Some(code),
            projected_bytes,
            quota_bytes,
        }
    }
}

/// Simulate writing `items_after` and `structure_after`
///
/// Nothing is written.
pub async fn precheck(
    storage: &dyn SyncStorage,
    items_after: &ItemMap,
    structure_after: &StorageMap,
    limits: ChunkLimits,
) -> QuotaPrecheck {
    let quota = storage.quota();

    let current = match storage.get_all().await {
        Ok(all) => all,
        Err(e) => {
            warn!("Quota precheck could not read usage: {}", e);
            return QuotaPrecheck::failed(
                QuotaErrorCode::SyncQuotaPrecheckFailed,
                0,
                quota.total_bytes,
            );
        }
    };
    let in_use: usize = current.iter().map(|(k, v)| entry_size(k, v)).sum();

    let packed = chunks::pack(items_after, &chunks::new_chunk_set_id(), limits);
    if packed.largest_chunk_bytes() > quota.per_item_bytes {
        debug!(
            "Precheck: a chunk of {} bytes exceeds the per-item quota",
            packed.largest_chunk_bytes()
        );
        return QuotaPrecheck::failed(
            QuotaErrorCode::SyncQuotaExceeded,
            in_use + packed.total_bytes(),
            quota.total_bytes,
        );
    }

    // Structure keys replace their current values
    let structure_delta: isize = structure_after
        .iter()
        .map(|(k, v)| {
            let new = entry_size(k, v) as isize;
            let old = current.get(k).map_or(0, |old| entry_size(k, old)) as isize;
            new - old
        })
        .sum();

    let projected = (in_use as isize + packed.total_bytes() as isize + structure_delta).max(0) as usize;
    debug!(
        "Precheck: {} bytes in use, {} projected, quota {}",
        in_use, projected, quota.total_bytes
    );

    if projected > quota.total_bytes {
        return QuotaPrecheck::failed(QuotaErrorCode::SyncQuotaExceeded, projected, quota.total_bytes);
    }
    QuotaPrecheck {
        ok: true,
        error_code: None,
        projected_bytes: projected,
        quota_bytes: quota.total_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemPayload, Link};
    use crate::storage::{MemoryStorage, StorageQuota};
    use serde_json::json;

    fn items(count: usize) -> ItemMap {
        (0..count)
            .map(|n| {
                let payload: ItemPayload =
                    Link::with_id(format!("qlink_{}", n), "https://example.com").into();
                (payload.id().to_string(), payload)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_precheck_fits() {
        let storage = MemoryStorage::new();
        let mut structure = StorageMap::new();
        structure.insert("items".to_string(), json!(["qlink_0"]));

        let result = precheck(&storage, &items(1), &structure, ChunkLimits::default()).await;
        assert!(result.ok);
        assert!(result.error_code.is_none());
        assert!(result.projected_bytes > 0);
    }

    #[tokio::test]
    async fn test_precheck_exceeded_does_not_write() {
        let storage = MemoryStorage::with_quota(StorageQuota {
            per_item_bytes: 8_192,
            total_bytes: 1_000,
        });
        let result = precheck(&storage, &items(50), &StorageMap::new(), ChunkLimits::default()).await;

        assert!(!result.ok);
        assert_eq!(result.error_code, Some(QuotaErrorCode::SyncQuotaExceeded));
        assert!(result.projected_bytes > 1_000);
        assert_eq!(storage.write_count(), 0);
    }

    #[tokio::test]
    async fn test_precheck_counts_old_chunk_set() {
        let storage = MemoryStorage::with_quota(StorageQuota {
            per_item_bytes: 8_192,
            total_bytes: 4_000,
        });
        let current = chunks::pack(&items(10), "qcsaaaaaaaaaaaa", ChunkLimits::default());
        let current_bytes = current.total_bytes();
        storage.set(current.into_storage_map()).await.unwrap();

        let result = precheck(&storage, &items(10), &StorageMap::new(), ChunkLimits::default()).await;
        assert!(result.projected_bytes >= current_bytes * 2 - 32);
    }

    #[test]
    fn test_error_code_wire_format() {
        let result = QuotaPrecheck::failed(QuotaErrorCode::SyncQuotaExceeded, 10, 5);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"ok": false, "errorCode": "SYNC_QUOTA_EXCEEDED", "projectedBytes": 10, "quotaBytes": 5})
        );
    }
}
