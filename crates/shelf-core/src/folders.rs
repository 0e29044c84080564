//! Folder lifecycle
//!
//! Apply-step functions that run inside a commit. Each one either changes
//! the draft and returns `Ok`, or returns a `ValidationError` before making
//! any change, so the caller can abort the commit without partial state.
//!
//! Rules:
//! - A folder holds 1..=24 link ids; no folders, no system items
//! - A contained link is not present at top level
//! - A folder left without children is dissolved in the same commit

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::commit::CommitDraft;
use crate::entries::{self, Position};
use crate::error::ValidationError;
use crate::events::FolderAction;
use crate::models::{
    check_len, is_folder_id, is_system_id, new_folder_id, Entry, Folder, MAX_FOLDER_CHILDREN,
    MAX_FOLDER_TITLE_LEN,
};

/// How `delete_folder` treats the children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteMode {
    /// Delete the folder and every child
    Cascade,
    /// Release the children to the folder's former position
    Dissolve,
}

/// Result of a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub folder_id: String,
    /// True when a new folder was created for the pair
    pub created: bool,
}

/// Check that `id` may live inside a folder
fn check_child(draft: &CommitDraft, id: &str) -> Result<(), ValidationError> {
    if is_system_id(id) {
        return Err(ValidationError::SystemItem(id.to_string()));
    }
    if is_folder_id(id) || draft.folder(id).is_some() {
        return Err(ValidationError::IsFolder(id.to_string()));
    }
    if draft.link(id).is_none() {
        return Err(ValidationError::NotFound(id.to_string()));
    }
    Ok(())
}

fn require_folder<'a>(draft: &'a CommitDraft, id: &str) -> Result<&'a Folder, ValidationError> {
    match draft.items.get(id) {
        Some(payload) => payload
            .as_folder()
            .ok_or_else(|| ValidationError::NotAFolder(id.to_string())),
        None => Err(ValidationError::NotFound(id.to_string())),
    }
}

fn clean_title(title: &str) -> Result<String, ValidationError> {
    let title = title.trim();
    check_len("folder title", title, MAX_FOLDER_TITLE_LEN)?;
    Ok(title.to_string())
}

/// Replace the entry for `id` with `replacement`, appending if it is absent
fn replace_entry(draft: &mut CommitDraft, id: &str, replacement: Vec<Entry>) {
    match entries::position_of(&draft.entries, id) {
        Some(at) => {
            draft.entries.splice(at..=at, replacement);
        }
        None => draft.entries.extend(replacement),
    }
}

/// Take `child` out of whatever folder holds it
///
/// A folder emptied this way disappears; nothing is left to release.
/// Returns the ids of folders that were removed.
pub fn detach_from_folders(draft: &mut CommitDraft, child: &str) -> Vec<String> {
    let owners: Vec<String> = draft
        .items
        .values()
        .filter_map(|p| p.as_folder())
        .filter(|f| f.contains(child))
        .map(|f| f.id.clone())
        .collect();

    let mut removed = Vec::new();
    for folder_id in owners {
        let now_empty = match draft.folder_mut(&folder_id) {
            Some(folder) => {
                folder.children.retain(|c| c != child);
                folder.children.is_empty()
            }
            None => false,
        };
        if now_empty {
            draft.remove_item(&folder_id);
            draft.remove_entry(&folder_id);
            removed.push(folder_id);
        }
    }
    removed
}

/// Create a folder from existing links
///
/// Invalid ids (system items, folders, unknown ids) are skipped and the
/// list is cut to the folder capacity. Without a position the folder takes
/// the top-level slot of its first child.
pub fn create_folder(
    draft: &mut CommitDraft,
    title: &str,
    child_ids: &[String],
    position: Option<Position>,
) -> Result<Folder, ValidationError> {
    let title = clean_title(title)?;

    let mut seen = HashSet::new();
    let children: Vec<String> = child_ids
        .iter()
        .filter(|id| check_child(draft, id).is_ok())
        .filter(|id| seen.insert(id.as_str()))
        .take(MAX_FOLDER_CHILDREN)
        .cloned()
        .collect();
    if children.is_empty() {
        return Err(ValidationError::EmptyFolder);
    }

    let mut folder = Folder::new(new_folder_id(), title);
    folder.children = children.clone();
    let folder_entry = Entry::Folder(folder.id.clone());

    for child in &children {
        detach_from_folders(draft, child);
    }

    match position {
        Some(position) => {
            for child in &children {
                draft.remove_entry(child);
            }
            draft.insert_entry(folder_entry, Some(position));
        }
        None => {
            let anchor = children.iter().find(|c| draft.has_entry(c)).cloned();
            match anchor {
                Some(anchor) => {
                    replace_entry(draft, &anchor, vec![folder_entry]);
                    for child in children.iter().filter(|c| **c != anchor) {
                        draft.remove_entry(child);
                    }
                }
                None => draft.entries.push(folder_entry),
            }
        }
    }

    draft.set_item(folder.clone());
    Ok(folder)
}

/// Move a link into an existing folder
///
/// Returns false if it was already there.
pub fn add_to_folder(
    draft: &mut CommitDraft,
    folder_id: &str,
    item_id: &str,
) -> Result<bool, ValidationError> {
    let folder = require_folder(draft, folder_id)?;
    check_child(draft, item_id)?;
    if folder.contains(item_id) {
        return Ok(false);
    }
    if folder.is_full() {
        return Err(ValidationError::FolderFull(folder_id.to_string()));
    }

    detach_from_folders(draft, item_id);
    draft.remove_entry(item_id);
    if let Some(folder) = draft.folder_mut(folder_id) {
        folder.children.push(item_id.to_string());
    }
    Ok(true)
}

/// Release a child back to the top level
///
/// Without a position the child lands right before the folder, so releasing
/// children one by one keeps their relative order. Releasing the last child
/// dissolves the folder in place.
pub fn remove_from_folder(
    draft: &mut CommitDraft,
    folder_id: &str,
    item_id: &str,
    position: Option<Position>,
) -> Result<FolderAction, ValidationError> {
    let folder = require_folder(draft, folder_id)?;
    if !folder.contains(item_id) {
        return Err(ValidationError::NotFound(item_id.to_string()));
    }
    let last_child = folder.children.len() == 1;
    let released = Entry::Item(item_id.to_string());

    if last_child {
        draft.remove_item(folder_id);
        match position {
            Some(position) => {
                draft.remove_entry(folder_id);
                draft.insert_entry(released, Some(position));
            }
            None => replace_entry(draft, folder_id, vec![released]),
        }
        return Ok(FolderAction::Dissolved);
    }

    if let Some(folder) = draft.folder_mut(folder_id) {
        folder.children.retain(|c| c != item_id);
    }
    match position {
        Some(position) => draft.insert_entry(released, Some(position)),
        None => match entries::position_of(&draft.entries, folder_id) {
            Some(at) => draft.entries.insert(at, released),
            None => draft.entries.push(released),
        },
    }
    Ok(FolderAction::Removed)
}

/// Drop `dragged` onto `target`
///
/// Onto a folder it is added; onto a link a new folder holding both takes
/// the target's slot.
pub fn merge_into_folder(
    draft: &mut CommitDraft,
    dragged: &str,
    target: &str,
) -> Result<MergeOutcome, ValidationError> {
    if dragged == target {
        return Err(ValidationError::SelfMerge(dragged.to_string()));
    }
    check_child(draft, dragged)?;
    if is_system_id(target) {
        return Err(ValidationError::SystemItem(target.to_string()));
    }

    if draft.folder(target).is_some() {
        add_to_folder(draft, target, dragged)?;
        return Ok(MergeOutcome {
            folder_id: target.to_string(),
            created: false,
        });
    }

    check_child(draft, target)?;
    let children = vec![target.to_string(), dragged.to_string()];
    let folder = create_folder(draft, "", &children, None)?;
    Ok(MergeOutcome {
        folder_id: folder.id,
        created: true,
    })
}

/// Delete a folder; returns the child ids that were deleted or released
pub fn delete_folder(
    draft: &mut CommitDraft,
    folder_id: &str,
    mode: DeleteMode,
) -> Result<Vec<String>, ValidationError> {
    let children = require_folder(draft, folder_id)?.children.clone();
    draft.remove_item(folder_id);

    match mode {
        DeleteMode::Cascade => {
            draft.remove_entry(folder_id);
            for child in &children {
                draft.remove_item(child);
                draft.remove_entry(child);
            }
            draft.dock_pins.retain(|pin| !children.contains(pin));
        }
        DeleteMode::Dissolve => {
            let released = children.iter().map(|c| Entry::Item(c.clone())).collect();
            replace_entry(draft, folder_id, released);
        }
    }
    Ok(children)
}

pub fn rename_folder(
    draft: &mut CommitDraft,
    folder_id: &str,
    title: &str,
) -> Result<(), ValidationError> {
    require_folder(draft, folder_id)?;
    let title = clean_title(title)?;
    if let Some(folder) = draft.folder_mut(folder_id) {
        folder.title = title;
    }
    Ok(())
}

/// Reorder children; unknown ids are dropped and missing children keep
/// their relative order at the end
pub fn reorder_folder_children(
    draft: &mut CommitDraft,
    folder_id: &str,
    ordered: &[String],
) -> Result<Vec<String>, ValidationError> {
    let current = require_folder(draft, folder_id)?.children.clone();

    let mut seen = HashSet::new();
    let mut next: Vec<String> = ordered
        .iter()
        .filter(|id| current.contains(id))
        .filter(|id| seen.insert(id.to_string()))
        .cloned()
        .collect();
    next.extend(current.iter().filter(|id| !seen.contains(*id)).cloned());

    if let Some(folder) = draft.folder_mut(folder_id) {
        folder.children = next.clone();
    }
    Ok(next)
}

/// Remove a link or folder from everywhere it appears
///
/// Folders are deleted with their children. Returns every removed id.
pub fn delete_entry(draft: &mut CommitDraft, id: &str) -> Result<Vec<String>, ValidationError> {
    if is_system_id(id) {
        return Err(ValidationError::SystemItem(id.to_string()));
    }
    if draft.folder(id).is_some() {
        let mut removed = delete_folder(draft, id, DeleteMode::Cascade)?;
        removed.insert(0, id.to_string());
        return Ok(removed);
    }
    if draft.link(id).is_none() && !draft.has_entry(id) {
        return Err(ValidationError::NotFound(id.to_string()));
    }

    detach_from_folders(draft, id);
    draft.remove_entry(id);
    draft.remove_item(id);
    draft.dock_pins.retain(|pin| pin != id);
    Ok(vec![id.to_string()])
}
