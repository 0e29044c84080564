//! Dock command handlers

use anyhow::{bail, Context, Result};

use shelf_core::{PinOutcome, Store};

use crate::commands::item::resolve_id;
use crate::output::Output;

pub fn show(store: &Store, output: &Output) -> Result<()> {
    output.print_dock(&store.dock(), store.settings().dock_capacity);
    Ok(())
}

pub async fn pin(store: &Store, id: &str, output: &Output) -> Result<()> {
    let id = resolve_id(store, id)?;
    let outcome = store
        .pin_to_dock(&id)
        .await
        .context("Failed to pin")?;

    match outcome {
        PinOutcome::Pinned => output.success(&format!("Pinned {}", id)),
        PinOutcome::AlreadyPinned => output.message(&format!("{} is already pinned", id)),
        PinOutcome::Rejected { reason } => bail!("Cannot pin {}: {}", id, reason),
    }
    Ok(())
}

pub async fn unpin(store: &Store, id: &str, output: &Output) -> Result<()> {
    let id = resolve_id(store, id).unwrap_or_else(|_| id.to_string());
    let removed = store
        .unpin_from_dock(&id)
        .await
        .context("Failed to unpin")?;

    if removed {
        output.success(&format!("Unpinned {}", id));
    } else {
        output.message(&format!("{} was not pinned", id));
    }
    Ok(())
}

/// Reorder the visible pins
pub async fn order(store: &Store, ids: &[String], output: &Output) -> Result<()> {
    let ids = ids
        .iter()
        .map(|id| resolve_id(store, id))
        .collect::<Result<Vec<_>>>()?;

    store
        .reorder_dock(&ids)
        .await
        .context("Failed to reorder dock")?;

    show(store, output)
}

pub async fn capacity(store: &Store, capacity: usize, output: &Output) -> Result<()> {
    let settings = store
        .set_dock_capacity(capacity)
        .await
        .context("Failed to set dock capacity")?;

    output.success(&format!("Dock capacity is {}", settings.dock_capacity));
    Ok(())
}
