//! Orphan repair
//!
//! Reads tolerate referential damage (a pin to a deleted link, a folder
//! child without payload, a link both inside a folder and at top level).
//! `inspect` spots it on a snapshot; `repair` fixes it inside a commit.
//!
//! When chunks of the active set could not be read, a missing payload may
//! only be unreadable, so entries and pins are never dropped for lacking one.

use std::collections::HashSet;

use serde::Serialize;
use tracing::info;

use crate::commit::{CommitDraft, Snapshot};
use crate::models::{Entry, ItemPayload, MAX_FOLDER_CHILDREN};

/// What a repair pass found and fixed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    /// Folder children that were missing, not links, or owned twice
    pub dangling_children: usize,
    /// Top-level entries without a payload
    pub missing_payloads: usize,
    /// Links listed both at top level and in a folder
    pub duplicated_entries: usize,
    pub empty_folders: usize,
    pub invalid_pins: usize,
    /// Payloads not reachable from the entry list, re-attached at the end
    pub orphan_payloads: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    pub fn total(&self) -> usize {
        self.dangling_children
            + self.missing_payloads
            + self.duplicated_entries
            + self.empty_folders
            + self.invalid_pins
            + self.orphan_payloads
    }
}

/// Check a snapshot without changing it
pub fn inspect(snapshot: &Snapshot) -> RepairReport {
    let mut draft = CommitDraft::new(snapshot.clone());
    repair(&mut draft)
}

/// Fix every inconsistency in the draft
///
/// Does nothing when the item map was not loaded, since every check
/// depends on it.
pub fn repair(draft: &mut CommitDraft) -> RepairReport {
    let mut report = RepairReport::default();
    if !draft.items_loaded() {
        return report;
    }
    let partial = draft.is_partial();

    // Folder children: links only, each owned once, capacity respected
    let mut folder_ids: Vec<String> = draft
        .items
        .values()
        .filter_map(ItemPayload::as_folder)
        .map(|f| f.id.clone())
        .collect();
    folder_ids.sort();

    let mut owned: HashSet<String> = HashSet::new();
    for folder_id in &folder_ids {
        let children = match draft.folder(folder_id) {
            Some(folder) => folder.children.clone(),
            None => continue,
        };
        let kept: Vec<String> = children
            .iter()
            .filter(|c| partial || draft.link(c).is_some())
            .filter(|c| owned.insert(c.to_string()))
            .take(MAX_FOLDER_CHILDREN)
            .cloned()
            .collect();
        report.dangling_children += children.len() - kept.len();

        if kept.is_empty() {
            draft.remove_item(folder_id);
            draft.remove_entry(folder_id);
            report.empty_folders += 1;
        } else if let Some(folder) = draft.folder_mut(folder_id) {
            folder.children = kept;
        }
    }

    // Top-level entries: need a payload and must not also sit in a folder
    let mut top_level: HashSet<String> = HashSet::new();
    let mut entries = Vec::with_capacity(draft.entries.len());
    for entry in &draft.entries {
        match entry {
            Entry::Item(id) | Entry::Folder(id) if !partial && !draft.items.contains_key(id) => {
                report.missing_payloads += 1;
            }
            Entry::Item(id) if owned.contains(id) => {
                report.duplicated_entries += 1;
            }
            Entry::Item(id) if draft.folder(id).is_some() => {
                // A folder payload stored under a link-shaped id
                report.missing_payloads += 1;
            }
            other => {
                if let Some(id) = other.id() {
                    top_level.insert(id.to_string());
                }
                entries.push(other.clone());
            }
        }
    }

    // Reachable nowhere: put it back at the end rather than lose it. On a
    // partial read the referencing folder may be the unreadable payload.
    let mut orphans: Vec<&ItemPayload> = draft
        .items
        .values()
        .filter(|p| !partial && !top_level.contains(p.id()) && !owned.contains(p.id()))
        .collect();
    orphans.sort_by(|a, b| a.id().cmp(b.id()));
    for payload in orphans {
        let entry = match payload {
            ItemPayload::Folder(f) => Entry::Folder(f.id.clone()),
            ItemPayload::Link(l) => Entry::Item(l.id.clone()),
        };
        entries.push(entry);
        report.orphan_payloads += 1;
    }
    draft.entries = entries;

    let mut seen = HashSet::new();
    let pins: Vec<String> = draft
        .dock_pins
        .iter()
        .filter(|id| partial || draft.link(id).is_some())
        .filter(|id| seen.insert(id.to_string()))
        .cloned()
        .collect();
    report.invalid_pins = draft.dock_pins.len() - pins.len();
    draft.dock_pins = pins;

    if !report.is_clean() {
        info!("Repaired {} inconsistencies: {:?}", report.total(), report);
    }
    report
}
