//! Bulk import

use std::path::Path;

use anyhow::{bail, Context, Result};

use shelf_core::{NewLink, QuotaPrecheck, Store};

use crate::output::Output;

/// Import links from a JSON array
///
/// The whole batch is checked against the sync quota first; nothing is
/// written when it does not fit.
pub async fn run(store: &Store, file: &Path, dry_run: bool, output: &Output) -> Result<()> {
    let links = read_links(file)?;
    if links.is_empty() {
        output.message("Nothing to import.");
        return Ok(());
    }

    if dry_run {
        let links = links
            .into_iter()
            .map(NewLink::into_link)
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid link in import file")?;
        let precheck = store.precheck_import(&links).await;
        return report_precheck(&precheck, links.len(), output);
    }

    let count = links.len();
    let report = store
        .import_items(links)
        .await
        .context("Failed to import")?;

    if output.is_json() {
        output.json(&report);
    }
    if !report.is_ok() {
        bail!(
            "Import refused ({}): {} bytes needed, quota is {}",
            report
                .precheck
                .error_code
                .map(|code| code.to_string())
                .unwrap_or_default(),
            report.precheck.projected_bytes,
            report.precheck.quota_bytes
        );
    }

    if !output.is_json() {
        output.success(&format!("Imported {} of {} link(s)", report.item_ids.len(), count));
    }
    Ok(())
}

fn read_links(file: &Path) -> Result<Vec<NewLink>> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {:?}", file))?;
    serde_json::from_str(&content).context("Import file must be a JSON array of links")
}

fn report_precheck(precheck: &QuotaPrecheck, count: usize, output: &Output) -> Result<()> {
    if output.is_json() {
        output.json(precheck);
        return Ok(());
    }

    if precheck.ok {
        output.success(&format!(
            "{} link(s) fit: {} of {} bytes",
            count, precheck.projected_bytes, precheck.quota_bytes
        ));
    } else {
        output.message(&format!(
            "{} link(s) do not fit ({}): {} of {} bytes",
            count,
            precheck
                .error_code
                .map(|code| code.to_string())
                .unwrap_or_default(),
            precheck.projected_bytes,
            precheck.quota_bytes
        ));
    }
    Ok(())
}
