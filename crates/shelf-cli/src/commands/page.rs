//! Page command handlers

use std::path::Path;

use anyhow::{bail, Context, Result};

use shelf_core::Store;

use crate::output::Output;
use crate::prompt::confirm;

pub fn count(store: &Store, output: &Output) -> Result<()> {
    let count = store.get_page_count();
    if output.is_json() {
        output.json(&serde_json::json!({ "pageCount": count }));
    } else {
        println!("{}", count);
    }
    Ok(())
}

/// Remove a page together with everything on it
pub async fn remove(store: &Store, page: usize, yes: bool, output: &Output) -> Result<()> {
    if page == 0 {
        bail!("Pages start at 1");
    }
    let index = page - 1;
    let items = store.get_page(index);

    if output.should_prompt() && !yes && !items.is_empty() {
        println!("Page {} holds {} item(s).", page, items.len());
        if !confirm("Delete the page and its items?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = store
        .remove_page(index)
        .await
        .context("Failed to remove page")?;
    if !removed {
        bail!("No page {}", page);
    }

    output.success(&format!("Removed page {}", page));
    Ok(())
}

/// Rewrite the layout from a JSON array of pages, each an array of ids
///
/// Unknown ids are dropped and items missing from the file are kept at
/// the end.
pub async fn order(store: &Store, file: &Path, output: &Output) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read layout file: {:?}", file))?;
    let pages: Vec<Vec<String>> =
        serde_json::from_str(&content).context("Layout must be an array of arrays of ids")?;

    store
        .reorder_from_dom(&pages)
        .await
        .context("Failed to reorder")?;

    output.success(&format!(
        "Layout updated ({} page(s))",
        store.get_page_count()
    ));
    Ok(())
}
