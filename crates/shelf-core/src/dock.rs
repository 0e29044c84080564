//! Dock pins
//!
//! The dock shows the first `capacity` valid pins. Pins past the capacity
//! stay stored so they come back when the capacity grows.
//!
//! Pin validity is always judged against the snapshot read at the start of
//! the commit (`CommitDraft::before`), never against the draft being built.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::commit::{CommitDraft, Snapshot};
use crate::models::is_system_id;

/// Why a pin was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PinRejection {
    /// Capacity is 0
    Disabled,
    Full,
    Folder,
    Missing,
    System,
}

impl std::fmt::Display for PinRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            PinRejection::Disabled => "dock is disabled",
            PinRejection::Full => "dock is full",
            PinRejection::Folder => "folders cannot be pinned",
            PinRejection::Missing => "item does not exist",
            PinRejection::System => "system items cannot be pinned",
        };
        f.write_str(reason)
    }
}

/// Result of `pin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum PinOutcome {
    Pinned,
    AlreadyPinned,
    Rejected { reason: PinRejection },
}

impl PinOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, PinOutcome::Rejected { .. })
    }
}

/// Pins of `snapshot` that resolve to a link, deduplicated, in order
pub fn valid_pins(snapshot: &Snapshot) -> Vec<String> {
    let mut seen = HashSet::new();
    snapshot
        .dock_pins
        .iter()
        .filter(|id| snapshot.link(id).is_some())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Pins currently shown in the dock
pub fn visible_pins(snapshot: &Snapshot) -> Vec<String> {
    let mut pins = valid_pins(snapshot);
    pins.truncate(snapshot.settings.dock_capacity);
    pins
}

/// Pin `id` at the end of the dock
///
/// Invalid pins found in the snapshot are dropped in the same commit. A pin
/// stored past the capacity is not shown, so pinning it again counts as a
/// new pin and needs a free slot.
pub fn pin(draft: &mut CommitDraft, id: &str) -> PinOutcome {
    let capacity = draft.settings.dock_capacity;
    let before = draft.before();
    let valid = valid_pins(before);
    let shown = valid.iter().take(capacity).any(|p| p == id);

    let rejection = if capacity == 0 {
        Some(PinRejection::Disabled)
    } else if is_system_id(id) {
        Some(PinRejection::System)
    } else if before.folder(id).is_some() {
        Some(PinRejection::Folder)
    } else if before.link(id).is_none() {
        Some(PinRejection::Missing)
    } else if shown {
        None
    } else if valid.len() >= capacity {
        Some(PinRejection::Full)
    } else {
        None
    };

    if let Some(reason) = rejection {
        return PinOutcome::Rejected { reason };
    }

    draft.dock_pins = valid;
    if shown {
        return PinOutcome::AlreadyPinned;
    }
    draft.dock_pins.push(id.to_string());
    PinOutcome::Pinned
}

/// Remove `id` from the dock; false if it was not pinned
pub fn unpin(draft: &mut CommitDraft, id: &str) -> bool {
    let before = draft.dock_pins.len();
    draft.dock_pins.retain(|p| p != id);
    draft.dock_pins.len() != before
}

/// Apply the order shown in the dock
///
/// Ids that do not resolve are dropped and the visible part is cut to the
/// capacity. Pins hidden past the capacity are kept at the end.
pub fn reorder(draft: &mut CommitDraft, ordered: &[String]) -> Vec<String> {
    let capacity = draft.settings.dock_capacity;
    let before = draft.before();

    let mut seen = HashSet::new();
    let mut next: Vec<String> = ordered
        .iter()
        .filter(|id| before.link(id).is_some())
        .filter(|id| seen.insert(id.to_string()))
        .take(capacity)
        .cloned()
        .collect();

    let hidden: Vec<String> = valid_pins(before)
        .into_iter()
        .skip(capacity)
        .filter(|id| !seen.contains(id))
        .collect();
    next.extend(hidden);

    draft.dock_pins = next.clone();
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Settings;
    use crate::models::{Entry, Folder, Link};

    fn draft(capacity: usize, links: &[&str], pins: &[&str]) -> CommitDraft {
        let mut snapshot = Snapshot::empty(Settings {
            dock_capacity: capacity,
            page_size: 24,
        });
        for id in links {
            snapshot
                .items
                .insert(id.to_string(), Link::with_id(*id, "https://example.com").into());
            snapshot.entries.push(Entry::Item(id.to_string()));
        }
        let folder = Folder::new("qfolder_f", "F");
        snapshot.items.insert(folder.id.clone(), folder.into());
        snapshot.dock_pins = pins.iter().map(|s| s.to_string()).collect();
        CommitDraft::new(snapshot)
    }

    #[test]
    fn test_pin_full_leaves_pins_unchanged() {
        let mut d = draft(2, &["qlink_a", "qlink_b", "qlink_c"], &["qlink_a", "qlink_b"]);
        assert_eq!(
            pin(&mut d, "qlink_c"),
            PinOutcome::Rejected {
                reason: PinRejection::Full
            }
        );
        assert_eq!(d.dock_pins, vec!["qlink_a", "qlink_b"]);
    }

    #[test]
    fn test_pin_rejections() {
        let mut d = draft(0, &["qlink_a"], &[]);
        assert_eq!(
            pin(&mut d, "qlink_a"),
            PinOutcome::Rejected {
                reason: PinRejection::Disabled
            }
        );

        let mut d = draft(4, &["qlink_a"], &[]);
        let reason = |outcome| match outcome {
            PinOutcome::Rejected { reason } => Some(reason),
            _ => None,
        };
        assert_eq!(reason(pin(&mut d, "qfolder_f")), Some(PinRejection::Folder));
        assert_eq!(reason(pin(&mut d, "qlink_zz")), Some(PinRejection::Missing));
        assert_eq!(reason(pin(&mut d, "qsys_add")), Some(PinRejection::System));
    }

    #[test]
    fn test_pin_drops_dangling_pins() {
        let mut d = draft(2, &["qlink_a", "qlink_b"], &["qlink_gone", "qlink_a"]);
        assert_eq!(pin(&mut d, "qlink_b"), PinOutcome::Pinned);
        assert_eq!(d.dock_pins, vec!["qlink_a", "qlink_b"]);

        let mut d = draft(2, &["qlink_a"], &["qlink_a", "qlink_a"]);
        assert_eq!(pin(&mut d, "qlink_a"), PinOutcome::AlreadyPinned);
        assert_eq!(d.dock_pins, vec!["qlink_a"]);
    }

    #[test]
    fn test_pin_hidden_past_capacity_is_full() {
        let links = ["qlink_a", "qlink_b", "qlink_c"];
        let mut d = draft(2, &links, &links);
        assert_eq!(
            pin(&mut d, "qlink_c"),
            PinOutcome::Rejected {
                reason: PinRejection::Full
            }
        );
        assert_eq!(d.dock_pins, vec!["qlink_a", "qlink_b", "qlink_c"]);
        assert_eq!(pin(&mut d, "qlink_b"), PinOutcome::AlreadyPinned);
    }

    #[test]
    fn test_validity_uses_snapshot_from_commit_start() {
        let mut d = draft(2, &["qlink_a"], &[]);
        // Removed from the draft after the commit started: still valid here
        d.items.remove("qlink_a");
        assert_eq!(pin(&mut d, "qlink_a"), PinOutcome::Pinned);
    }

    #[test]
    fn test_unpin() {
        let mut d = draft(2, &["qlink_a"], &["qlink_a"]);
        assert!(unpin(&mut d, "qlink_a"));
        assert!(!unpin(&mut d, "qlink_a"));
        assert!(d.dock_pins.is_empty());
    }

    #[test]
    fn test_reorder_keeps_hidden_pins() {
        let links = ["qlink_a", "qlink_b", "qlink_c", "qlink_d"];
        let mut d = draft(2, &links, &links);
        let ordered: Vec<String> = ["qlink_b", "qlink_x", "qlink_a", "qlink_c"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let next = reorder(&mut d, &ordered);
        assert_eq!(next, vec!["qlink_b", "qlink_a", "qlink_c", "qlink_d"]);
    }

    #[test]
    fn test_visible_pins_respect_capacity() {
        let links = ["qlink_a", "qlink_b", "qlink_c"];
        let d = draft(2, &links, &links);
        assert_eq!(visible_pins(d.before()), vec!["qlink_a", "qlink_b"]);
        assert_eq!(valid_pins(d.before()).len(), 3);
    }
}
