//! Folder command handlers

use anyhow::{Context, Result};

use shelf_core::{DeleteMode, FolderAction, Store};

use crate::commands::item::{folder_children, resolve_id};
use crate::output::Output;
use crate::prompt::confirm;

/// Create a folder holding `items`
pub async fn create(store: &Store, title: &str, items: &[String], output: &Output) -> Result<()> {
    let items = items
        .iter()
        .map(|id| resolve_id(store, id))
        .collect::<Result<Vec<_>>>()?;

    let folder = store
        .create_folder(title, &items, None)
        .await
        .context("Failed to create folder")?;

    output.success(&format!("Created folder: {}", folder.id));
    print(store, &folder.id, output);
    Ok(())
}

/// Drop `dragged` onto `target`
pub async fn merge(store: &Store, dragged: &str, target: &str, output: &Output) -> Result<()> {
    let dragged = resolve_id(store, dragged)?;
    let target = resolve_id(store, target)?;

    let merged = store
        .merge_items_into_folder(&dragged, &target)
        .await
        .context("Failed to merge")?;

    if output.is_json() {
        output.json(&merged);
    } else if merged.created {
        output.success(&format!("Created folder: {}", merged.folder_id));
    } else {
        output.success(&format!("Added to folder: {}", merged.folder_id));
    }
    Ok(())
}

pub async fn add(store: &Store, folder: &str, item: &str, output: &Output) -> Result<()> {
    let folder = resolve_id(store, folder)?;
    let item = resolve_id(store, item)?;

    let added = store
        .add_to_folder(&folder, &item)
        .await
        .context("Failed to add to folder")?;

    if added {
        output.success(&format!("Added {} to {}", item, folder));
    } else {
        output.message(&format!("{} is already in {}", item, folder));
    }
    Ok(())
}

/// Take a link out of a folder; it lands next to the folder
pub async fn remove(store: &Store, folder: &str, item: &str, output: &Output) -> Result<()> {
    let folder = resolve_id(store, folder)?;
    let item = resolve_id(store, item)?;

    let action = store
        .remove_from_folder(&folder, &item, None)
        .await
        .context("Failed to remove from folder")?;

    match action {
        FolderAction::Dissolved => {
            output.success(&format!("Removed {}; folder {} dissolved", item, folder))
        }
        _ => output.success(&format!("Removed {} from {}", item, folder)),
    }
    Ok(())
}

pub async fn rename(store: &Store, folder: &str, title: &str, output: &Output) -> Result<()> {
    let folder = resolve_id(store, folder)?;
    store
        .rename_folder(&folder, title)
        .await
        .context("Failed to rename folder")?;

    output.success(&format!("Renamed {} to {}", folder, title));
    Ok(())
}

pub async fn order(store: &Store, folder: &str, items: &[String], output: &Output) -> Result<()> {
    let folder = resolve_id(store, folder)?;
    let items = items
        .iter()
        .map(|id| resolve_id(store, id))
        .collect::<Result<Vec<_>>>()?;

    store
        .reorder_folder_children(&folder, &items)
        .await
        .context("Failed to reorder folder")?;

    print(store, &folder, output);
    Ok(())
}

/// Delete a folder, with or without its children
pub async fn delete(
    store: &Store,
    folder: &str,
    keep_children: bool,
    yes: bool,
    output: &Output,
) -> Result<()> {
    let folder = resolve_id(store, folder)?;
    let mode = if keep_children {
        DeleteMode::Dissolve
    } else {
        DeleteMode::Cascade
    };

    if output.should_prompt() && !yes && mode == DeleteMode::Cascade {
        let count = store.get_folder(&folder).map_or(0, |f| f.children.len());
        println!("Folder {} holds {} item(s).", folder, count);
        if !confirm("Delete the folder and its items?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let children = store
        .delete_folder(&folder, mode)
        .await
        .context("Failed to delete folder")?;

    match mode {
        DeleteMode::Cascade => output.success(&format!(
            "Deleted folder {} and {} item(s)",
            folder,
            children.len()
        )),
        DeleteMode::Dissolve => output.success(&format!(
            "Deleted folder {}; {} item(s) kept",
            folder,
            children.len()
        )),
    }
    Ok(())
}

fn print(store: &Store, folder_id: &str, output: &Output) {
    if let Some(folder) = store.get_folder(folder_id) {
        let children = folder_children(store, &folder.children);
        output.print_folder(&folder, &children);
    }
}
