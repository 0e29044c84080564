//! Storage change classification
//!
//! Maps the keys touched by one write to the narrowest action a tab needs:
//! ignore it, skip its own echo, refresh one structure key, or reload.

use serde_json::Value;
use tracing::debug;

use super::revision::RevisionTracker;
use crate::chunks::parse_chunk_key;
use crate::models::is_system_id;
use crate::storage::{keys, StorageChange};

/// What a tab has to do about one storage change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// Nothing relevant changed
    Ignore,
    /// The change is the echo of our own commit
    SelfEcho,
    /// Entries, payloads or several areas changed
    FullReload,
    DockOnly,
    TagsOnly,
    SettingsOnly,
}

/// Classify a change notification
///
/// Chunk keys never trigger a reload on their own: a new chunk set only
/// becomes visible once `activeChunkSetId` points at it, and that write
/// always comes with the structure.
pub fn classify(change: &StorageChange, tracker: &mut RevisionTracker) -> ChangeAction {
    if let Some(Value::String(token)) = change.new_value(keys::REVISION) {
        if tracker.is_own_echo(token) {
            debug!("Ignoring echo of own commit {}", token);
            return ChangeAction::SelfEcho;
        }
    }

    let mut dock = false;
    let mut tags = false;
    let mut settings = false;
    let mut structure = false;

    for key in change.keys() {
        match key {
            keys::DOCK_PINS => dock = true,
            keys::TAGS => tags = true,
            keys::SETTINGS => settings = true,
            keys::ITEMS | keys::ACTIVE_CHUNK_SET => structure = true,
            keys::REVISION => {}
            key if is_system_id(key) => structure = true,
            key if parse_chunk_key(key).is_some() => debug!("Chunk key {} changed", key),
            _ => {}
        }
    }

    match (structure, dock, tags, settings) {
        (false, false, false, false) => ChangeAction::Ignore,
        (false, true, false, false) => ChangeAction::DockOnly,
        (false, false, true, false) => ChangeAction::TagsOnly,
        (false, false, false, true) => ChangeAction::SettingsOnly,
        _ => ChangeAction::FullReload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ValueChange;
    use serde_json::json;
    use std::time::Duration;

    fn change(pairs: &[(&str, Value)]) -> StorageChange {
        StorageChange {
            changes: pairs
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        ValueChange {
                            old_value: None,
                            new_value: Some(v.clone()),
                        },
                    )
                })
                .collect(),
        }
    }

    fn tracker() -> RevisionTracker {
        RevisionTracker::new(Duration::from_secs(5))
    }

    #[test]
    fn test_own_echo_is_suppressed() {
        let mut tracker = tracker();
        let token = tracker.issue();
        let c = change(&[
            (keys::ITEMS, json!(["qlink_a"])),
            (keys::REVISION, json!(token.as_str())),
        ]);
        assert_eq!(classify(&c, &mut tracker), ChangeAction::SelfEcho);
        // The same token seen again is someone else's write
        assert_eq!(classify(&c, &mut tracker), ChangeAction::FullReload);
    }

    #[test]
    fn test_single_area_changes() {
        let mut tracker = tracker();
        let foreign = json!("rev-foreign");
        assert_eq!(
            classify(&change(&[(keys::DOCK_PINS, json!([])), (keys::REVISION, foreign)]), &mut tracker),
            ChangeAction::DockOnly
        );
        assert_eq!(
            classify(&change(&[(keys::TAGS, json!([]))]), &mut tracker),
            ChangeAction::TagsOnly
        );
        assert_eq!(
            classify(&change(&[(keys::SETTINGS, json!({}))]), &mut tracker),
            ChangeAction::SettingsOnly
        );
    }

    #[test]
    fn test_structure_and_mixed_changes_reload() {
        let mut tracker = tracker();
        assert_eq!(
            classify(&change(&[(keys::ACTIVE_CHUNK_SET, json!("qcsabc"))]), &mut tracker),
            ChangeAction::FullReload
        );
        assert_eq!(
            classify(
                &change(&[(keys::DOCK_PINS, json!([])), (keys::TAGS, json!([]))]),
                &mut tracker
            ),
            ChangeAction::FullReload
        );
        assert_eq!(
            classify(&change(&[("qsys_add", json!({"id": "qsys_add"}))]), &mut tracker),
            ChangeAction::FullReload
        );
    }

    #[test]
    fn test_chunk_only_changes_are_ignored() {
        let mut tracker = tracker();
        let c = change(&[("qcsabc_index", json!(["qcsabc_0"])), ("qcsabc_0", json!({}))]);
        assert_eq!(classify(&c, &mut tracker), ChangeAction::Ignore);
        assert_eq!(classify(&change(&[("unrelated", json!(1))]), &mut tracker), ChangeAction::Ignore);
    }
}
