//! Status and repair handlers

use anyhow::{Context, Result};

use shelf_core::{Config, ItemPayload, Store};

use crate::output::{Output, OutputFormat};

/// Show status information
pub async fn show(store: &Store, config: &Config, output: &Output) -> Result<()> {
    let storage = store.storage();
    let used = storage
        .bytes_in_use()
        .await
        .context("Failed to read the sync area")?;
    let keys = storage.keys().await.context("Failed to read the sync area")?.len();
    let quota = storage.quota();

    let snapshot = store.snapshot();
    let links = snapshot
        .items
        .values()
        .filter(|item| matches!(item, ItemPayload::Link(_)))
        .count();
    let folders = snapshot.items.len() - links;
    let settings = snapshot.settings;

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "database": config.sqlite_path(),
            "revision": snapshot.revision,
            "activeChunkSet": snapshot.active_chunk_set,
            "storage": {
                "keys": keys,
                "chunks": snapshot.chunk_keys.len(),
                "usedBytes": used,
                "quotaBytes": quota.total_bytes,
                "perItemQuotaBytes": quota.per_item_bytes
            },
            "counts": {
                "links": links,
                "folders": folders,
                "pages": store.get_page_count(),
                "pins": store.dock().len(),
                "tags": snapshot.tags.len()
            },
            "settings": settings
        })),
        OutputFormat::Quiet => {
            println!("{}", snapshot.revision.as_deref().unwrap_or("-"));
        }
        OutputFormat::Human => {
            println!("Shelf Status");
            println!("============");
            println!();
            println!("Storage:");
            println!("  Location: {}", config.sqlite_path().display());
            println!("  Used:     {} of {} bytes", used, quota.total_bytes);
            println!("  Keys:     {} ({} chunks)", keys, snapshot.chunk_keys.len());
            println!(
                "  Revision: {}",
                snapshot.revision.as_deref().unwrap_or("(none)")
            );
            println!();
            println!("Contents:");
            println!("  Links:   {}", links);
            println!("  Folders: {}", folders);
            println!("  Pages:   {}", store.get_page_count());
            println!("  Dock:    {}/{}", store.dock().len(), settings.dock_capacity);
            println!("  Tags:    {}", snapshot.tags.len());
            println!();
            println!("Page size: {}", settings.page_size);
        }
    }

    Ok(())
}

/// Repair references now and remove stale chunk sets
pub async fn repair(store: &Store, output: &Output) -> Result<()> {
    let report = store.repair_now().await.context("Repair failed")?;
    let collected = store
        .collect_obsolete_chunks()
        .await
        .context("Chunk cleanup failed")?;

    if output.is_json() {
        output.json(&serde_json::json!({
            "report": report,
            "removedChunks": collected,
        }));
        return Ok(());
    }

    if report.is_clean() {
        output.success("Nothing to repair");
    } else {
        output.success(&format!("Repaired {} problem(s)", report.total()));
    }
    if !collected.is_empty() {
        output.message(&format!("Removed {} stale chunk(s)", collected.len()));
    }
    Ok(())
}
