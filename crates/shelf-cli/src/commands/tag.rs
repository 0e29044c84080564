//! Tag command handlers

use anyhow::{Context, Result};

use shelf_core::Store;

use crate::output::Output;

/// List the tag library
pub fn list(store: &Store, output: &Output) -> Result<()> {
    output.print_tags(&store.tags());
    Ok(())
}

pub async fn add(store: &Store, tag: &str, output: &Output) -> Result<()> {
    let added = store.add_tag(tag).await.context("Failed to add tag")?;
    if added {
        output.success(&format!("Added tag: {}", tag));
    } else {
        output.message(&format!("Tag already exists: {}", tag));
    }
    Ok(())
}

/// Remove a tag from the library and every link
pub async fn remove(store: &Store, tag: &str, output: &Output) -> Result<()> {
    let removed = store.remove_tag(tag).await.context("Failed to remove tag")?;
    if removed {
        output.success(&format!("Removed tag: {}", tag));
    } else {
        output.message(&format!("No such tag: {}", tag));
    }
    Ok(())
}

pub async fn rename(store: &Store, from: &str, to: &str, output: &Output) -> Result<()> {
    let renamed = store
        .rename_tag(from, to)
        .await
        .context("Failed to rename tag")?;
    if renamed {
        output.success(&format!("Renamed tag {} to {}", from, to));
    } else {
        output.message(&format!("No such tag: {}", from));
    }
    Ok(())
}
