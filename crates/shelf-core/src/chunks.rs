//! Chunk codec
//!
//! Item payloads do not fit in one sync key, so they are packed into a chunk
//! set: `<id>_index` lists the chunk keys, `<id>_<n>` each hold an
//! `item id -> payload` map under the per-key budget. A commit always writes
//! a fresh chunk set and then swaps `activeChunkSetId`, so readers never see
//! a half-written set.
//!
//! Set ids embed their creation time. Cleanup removes the set a commit
//! replaced right away, but an unreferenced set that is still young may be
//! one another writer has written and not yet activated, so it is kept until
//! the grace period has passed.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::ItemPayload;
use crate::storage::{entry_size, keys, StorageMap, StorageResult, SyncStorage};

pub const CHUNK_SET_PREFIX: &str = "qcs";
const INDEX_SUFFIX: &str = "index";
/// Hex digits of the creation time in a set id
const STAMP_LEN: usize = 11;
const RANDOM_LEN: usize = 8;

/// Item id -> payload, as stored across a chunk set
pub type ItemMap = HashMap<String, ItemPayload>;

/// Size limits used while packing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Target size of one chunk key + value
    pub budget_bytes: usize,
    /// Hard limit of the sync area; only used for warnings
    pub per_item_quota_bytes: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            budget_bytes: crate::config::DEFAULT_CHUNK_BUDGET_BYTES,
            per_item_quota_bytes: crate::storage::QUOTA_BYTES_PER_ITEM,
        }
    }
}

/// Generate a fresh chunk set id
pub fn new_chunk_set_id() -> String {
    chunk_set_id_at(chrono::Utc::now().timestamp_millis())
}

fn chunk_set_id_at(millis: i64) -> String {
    format!(
        "{}{:0width$x}{}",
        CHUNK_SET_PREFIX,
        millis.max(0),
        &Uuid::new_v4().simple().to_string()[..RANDOM_LEN],
        width = STAMP_LEN
    )
}

/// Creation time (unix millis) encoded in a chunk set id
///
/// `None` for ids written without a timestamp.
pub fn chunk_set_created_at(chunk_set_id: &str) -> Option<i64> {
    let rest = chunk_set_id.strip_prefix(CHUNK_SET_PREFIX)?;
    if rest.len() != STAMP_LEN + RANDOM_LEN {
        return None;
    }
    i64::from_str_radix(rest.get(..STAMP_LEN)?, 16).ok()
}

pub fn index_key(chunk_set_id: &str) -> String {
    format!("{}_{}", chunk_set_id, INDEX_SUFFIX)
}

pub fn chunk_key(chunk_set_id: &str, n: usize) -> String {
    format!("{}_{}", chunk_set_id, n)
}

/// Chunk set id encoded in a chunk or index key
pub fn parse_chunk_key(key: &str) -> Option<&str> {
    let (id, suffix) = key.rsplit_once('_')?;
    let is_set_id = id
        .strip_prefix(CHUNK_SET_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()));
    let is_suffix =
        suffix == INDEX_SUFFIX || (!suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()));
    (is_set_id && is_suffix).then_some(id)
}

/// Estimated stored size of a key/value pair
pub fn estimate_size(key: &str, value: &Value) -> usize {
    entry_size(key, value)
}

/// A chunk set ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct PackedChunkSet {
    pub chunk_set_id: String,
    pub index_key: String,
    pub chunk_keys: Vec<String>,
    pub chunks_by_key: BTreeMap<String, Value>,
}

impl PackedChunkSet {
    /// Index and chunks as one write
    pub fn into_storage_map(self) -> StorageMap {
        let mut map: StorageMap = self.chunks_by_key.into_iter().collect();
        map.insert(
            self.index_key,
            Value::Array(self.chunk_keys.into_iter().map(Value::String).collect()),
        );
        map
    }

    /// Estimated bytes of index plus chunks
    pub fn total_bytes(&self) -> usize {
        let index = Value::Array(
            self.chunk_keys
                .iter()
                .map(|k| Value::String(k.clone()))
                .collect(),
        );
        estimate_size(&self.index_key, &index)
            + self
                .chunks_by_key
                .iter()
                .map(|(k, v)| estimate_size(k, v))
                .sum::<usize>()
    }

    pub fn largest_chunk_bytes(&self) -> usize {
        self.chunks_by_key
            .iter()
            .map(|(k, v)| estimate_size(k, v))
            .max()
            .unwrap_or(0)
    }
}

/// Size a chunk map would have once written under `key`
///
/// Computed incrementally: `{}` plus `"id":payload` per entry and the commas.
fn chunk_size(key: &str, entries: &[(String, String)]) -> usize {
    let body: usize = entries
        .iter()
        .map(|(id, json)| Value::String(id.clone()).to_string().len() + 1 + json.len())
        .sum();
    key.len() + 2 + body + entries.len().saturating_sub(1)
}

/// Pack payloads into chunks of at most `limits.budget_bytes`
///
/// Items are sorted by id and packed greedily. An item too large for the
/// budget is put in a chunk of its own; if even that is above the per-item
/// quota a warning is logged and the write is left to fail or succeed.
pub fn pack(items: &ItemMap, chunk_set_id: &str, limits: ChunkLimits) -> PackedChunkSet {
    let mut sorted: Vec<(&String, &ItemPayload)> = items.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut chunks: Vec<Vec<(String, String)>> = Vec::new();
    let mut current: Vec<(String, String)> = Vec::new();

    for (id, payload) in sorted {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!("Skipping unserializable payload {}: {}", id, e);
                continue;
            }
        };
        let entry = (id.clone(), json);

        let key = chunk_key(chunk_set_id, chunks.len());
        current.push(entry);
        if current.len() > 1 && chunk_size(&key, &current) > limits.budget_bytes {
            if let Some(entry) = current.pop() {
                chunks.push(std::mem::take(&mut current));
                current.push(entry);
            }
        }

        let key = chunk_key(chunk_set_id, chunks.len());
        let size = chunk_size(&key, &current);
        if current.len() == 1 && size > limits.per_item_quota_bytes {
            warn!(
                "Item {} needs {} bytes, above the {} byte per-item quota",
                id, size, limits.per_item_quota_bytes
            );
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let mut chunk_keys = Vec::with_capacity(chunks.len());
    let mut chunks_by_key = BTreeMap::new();
    for (n, entries) in chunks.into_iter().enumerate() {
        let key = chunk_key(chunk_set_id, n);
        let mut map = Map::new();
        for (id, json) in entries {
            match serde_json::from_str(&json) {
                Ok(value) => {
                    map.insert(id, value);
                }
                Err(e) => warn!("Dropping payload {} from chunk: {}", id, e),
            }
        }
        chunk_keys.push(key.clone());
        chunks_by_key.insert(key, Value::Object(map));
    }

    debug!(
        "Packed {} items into {} chunks for {}",
        items.len(),
        chunk_keys.len(),
        chunk_set_id
    );

    PackedChunkSet {
        chunk_set_id: chunk_set_id.to_string(),
        index_key: index_key(chunk_set_id),
        chunk_keys,
        chunks_by_key,
    }
}

/// Decode one stored chunk, skipping payloads that do not parse
pub fn decode_chunk(key: &str, value: &Value) -> ItemMap {
    let Some(object) = value.as_object() else {
        warn!("Chunk {} is not an object, ignoring", key);
        return ItemMap::new();
    };

    object
        .iter()
        .filter_map(|(id, payload)| {
            match serde_json::from_value::<ItemPayload>(payload.clone()) {
                Ok(payload) if payload.id() == id => Some((id.clone(), payload)),
                Ok(_) => {
                    warn!("Payload under {} in {} has a different id", id, key);
                    None
                }
                Err(e) => {
                    debug!("Undecodable payload {} in {}: {}", id, key, e);
                    None
                }
            }
        })
        .collect()
}

/// Chunk keys listed by a stored index value
pub fn index_entries(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|keys| {
            keys.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Payloads read from a chunk set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkSetRead {
    pub items: ItemMap,
    /// Listed chunk keys that were not in storage
    pub missing: Vec<String>,
}

/// Read and merge every chunk in `chunk_keys`
///
/// Missing or undecodable chunks contribute nothing; missing ones are
/// reported so callers can tell a partial read from a deletion.
pub async fn read_chunk_set(
    storage: &dyn SyncStorage,
    chunk_keys: &[String],
) -> StorageResult<ChunkSetRead> {
    let mut read = ChunkSetRead::default();
    if chunk_keys.is_empty() {
        return Ok(read);
    }

    let key_refs: Vec<&str> = chunk_keys.iter().map(String::as_str).collect();
    let stored = storage.get(&key_refs).await?;

    for key in chunk_keys {
        match stored.get(key) {
            Some(value) => read.items.extend(decode_chunk(key, value)),
            None => {
                debug!("Chunk {} is missing", key);
                read.missing.push(key.clone());
            }
        }
    }
    Ok(read)
}

/// Which unreferenced chunk sets a cleanup may remove
#[derive(Debug, Clone)]
pub struct CollectPolicy {
    /// Set replaced by the commit that triggered the cleanup
    pub superseded: Option<String>,
    /// Minimum age of any other unreferenced set
    pub grace: Duration,
    /// Current time in unix millis
    pub now_millis: i64,
}

impl CollectPolicy {
    pub fn new(superseded: Option<String>, grace: Duration) -> Self {
        Self {
            superseded,
            grace,
            now_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn may_remove(&self, chunk_set_id: &str) -> bool {
        if self.superseded.as_deref() == Some(chunk_set_id) {
            return true;
        }
        let grace = i64::try_from(self.grace.as_millis()).unwrap_or(i64::MAX);
        match chunk_set_created_at(chunk_set_id) {
            Some(created) => self.now_millis.saturating_sub(created) >= grace,
            None => true,
        }
    }
}

/// Keys of unreferenced chunk sets the policy allows removing
///
/// The active set is never included.
pub fn obsolete_chunk_keys<'a>(
    all_keys: impl IntoIterator<Item = &'a String>,
    active: Option<&str>,
    policy: &CollectPolicy,
) -> Vec<String> {
    all_keys
        .into_iter()
        .filter(|key| match parse_chunk_key(key) {
            Some(id) => Some(id) != active && policy.may_remove(id),
            None => false,
        })
        .cloned()
        .collect()
}

/// Remove obsolete chunk keys
///
/// The active id is read right before removal so a set activated by another
/// writer in the meantime is kept.
pub async fn collect_obsolete_chunks(
    storage: &dyn SyncStorage,
    policy: &CollectPolicy,
) -> StorageResult<Vec<String>> {
    let active = storage
        .get(&[keys::ACTIVE_CHUNK_SET])
        .await?
        .get(keys::ACTIVE_CHUNK_SET)
        .and_then(Value::as_str)
        .map(str::to_string);
    let all_keys = storage.keys().await?;
    let obsolete = obsolete_chunk_keys(&all_keys, active.as_deref(), policy);

    if !obsolete.is_empty() {
        storage.remove(&obsolete).await?;
        debug!("Removed {} obsolete chunk keys", obsolete.len());
    }
    Ok(obsolete)
}
