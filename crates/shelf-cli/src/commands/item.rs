//! Link and item command handlers

use anyhow::{anyhow, bail, Context, Result};

use shelf_core::{ItemPayload, Link, LinkUpdate, NewLink, Position, Store};

use crate::output::Output;
use crate::prompt::confirm;

/// Convert 1-based page/slot arguments to a position
pub fn position(page: Option<usize>, index: Option<usize>) -> Result<Option<Position>> {
    match (page, index) {
        (Some(page), Some(index)) => {
            if page == 0 || index == 0 {
                bail!("Pages and slots start at 1");
            }
            Ok(Some(Position::new(page - 1, index - 1)))
        }
        _ => Ok(None),
    }
}

/// Add a new link
pub async fn add(
    store: &Store,
    url: String,
    title: Option<String>,
    tags: Vec<String>,
    position: Option<Position>,
    new_page: bool,
    output: &Output,
) -> Result<()> {
    let mut new = NewLink::new(url);
    if let Some(title) = title {
        new = new.titled(title);
    }
    for tag in tags {
        new = new.tagged(tag);
    }

    if new_page {
        store.add_page();
    }

    let link = store
        .add_item(new, position)
        .await
        .context("Failed to add link")?;

    output.success(&format!("Added link: {}", link.id));
    output.print_link(&link);
    Ok(())
}

/// List one page, or every page
pub fn list(store: &Store, page: Option<usize>, output: &Output) -> Result<()> {
    let count = store.get_page_count();
    match page {
        Some(0) => bail!("Pages start at 1"),
        Some(page) if page > count => bail!("No page {} (there are {})", page, count),
        Some(page) => output.print_page(page - 1, count, &store.get_page(page - 1)),
        None => {
            for page in 0..count {
                output.print_page(page, count, &store.get_page(page));
            }
        }
    }
    Ok(())
}

/// Show a link or a folder
pub fn show(store: &Store, id: &str, output: &Output) -> Result<()> {
    let id = resolve_id(store, id)?;
    match store.get_item(&id) {
        Some(ItemPayload::Link(link)) => output.print_link(&link),
        Some(ItemPayload::Folder(folder)) => {
            let children = folder_children(store, &folder.children);
            output.print_folder(&folder, &children);
        }
        None => bail!("Item not found: {}", id),
    }
    Ok(())
}

/// Edit fields of a link
pub async fn edit(
    store: &Store,
    id: &str,
    title: Option<String>,
    url: Option<String>,
    icon: Option<String>,
    tags: Option<Vec<String>>,
    output: &Output,
) -> Result<()> {
    let id = resolve_id(store, id)?;
    let update = LinkUpdate {
        title,
        url,
        icon,
        tags,
    };

    let link = store
        .update_item(&id, update)
        .await
        .context("Failed to update link")?;

    output.success("Link updated");
    output.print_link(&link);
    Ok(())
}

/// Delete links or folders
pub async fn delete(store: &Store, ids: &[String], yes: bool, output: &Output) -> Result<()> {
    let ids = ids
        .iter()
        .map(|id| resolve_id(store, id))
        .collect::<Result<Vec<_>>>()?;

    if output.should_prompt() && !yes {
        for id in &ids {
            println!("Delete: {}", describe(store, id));
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = if ids.len() == 1 {
        store
            .delete_item(&ids[0])
            .await
            .context("Failed to delete item")?
    } else {
        store
            .remove_items(&ids)
            .await
            .context("Failed to delete items")?
    };

    if output.is_json() {
        output.json(&removed);
    } else {
        output.success(&format!("Deleted {} item(s)", removed.len()));
    }
    Ok(())
}

/// Move an item to a slot
pub async fn move_to(store: &Store, id: &str, position: Position, output: &Output) -> Result<()> {
    let id = resolve_id(store, id)?;
    let landed = store
        .move_item(&id, position)
        .await
        .context("Failed to move item")?;

    match landed {
        Some(at) => output.success(&format!(
            "Moved {} to page {}, slot {}",
            id,
            at.page + 1,
            at.index + 1
        )),
        None => bail!("Item not found: {}", id),
    }
    Ok(())
}

/// Search by substring, or by tag with a leading `#`
pub fn search(store: &Store, query: &str, output: &Output) -> Result<()> {
    let items = store.search(query);
    output.print_items(&items);
    Ok(())
}

/// Resolve a full id or an unambiguous id prefix
pub fn resolve_id(store: &Store, id: &str) -> Result<String> {
    if store.get_item(id).is_some() {
        return Ok(id.to_string());
    }

    let snapshot = store.snapshot();
    let mut matches: Vec<&ItemPayload> = snapshot
        .items
        .values()
        .filter(|item| item.id().starts_with(id))
        .collect();
    matches.sort_by(|a, b| a.id().cmp(b.id()));

    match matches.len() {
        0 => Err(anyhow!("No item found matching: {}", id)),
        1 => Ok(matches[0].id().to_string()),
        _ => {
            eprintln!("Multiple items match '{}':", id);
            for item in &matches {
                eprintln!("  {}", item.id());
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// Children of a folder that resolve to a link
pub fn folder_children(store: &Store, children: &[String]) -> Vec<Link> {
    children
        .iter()
        .filter_map(|id| match store.get_item(id) {
            Some(ItemPayload::Link(link)) => Some(link),
            _ => None,
        })
        .collect()
}

fn describe(store: &Store, id: &str) -> String {
    match store.get_item(id) {
        Some(ItemPayload::Link(link)) => format!("{} - {}", link.id, link.title),
        Some(ItemPayload::Folder(folder)) => format!(
            "{} - [{}] and its {} item(s)",
            folder.id,
            folder.title,
            folder.children.len()
        ),
        None => id.to_string(),
    }
}
