//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use shelf_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.json(&config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!("  dock_capacity:        {}", config.dock_capacity);
            println!("  page_size:            {}", config.page_size);
            println!("  chunk_budget_bytes:   {}", config.chunk_budget_bytes);
            println!("  per_item_quota_bytes: {}", config.per_item_quota_bytes);
            println!("  sync_quota_bytes:     {}", config.sync_quota_bytes);
            println!("  max_commit_attempts:  {}", config.max_commit_attempts);
            println!("  retry_backoff_ms:     {}", config.retry_backoff_ms);
            println!("  echo_expiry_ms:       {}", config.echo_expiry_ms);
            println!("  lock_name:            {}", config.lock_name);
            println!(
                "  log_level:            {}",
                config.log_level.as_deref().unwrap_or("(not set)")
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: &str, value: &str, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "dock_capacity" => {
            config.dock_capacity = parse_number(key, value)?;
        }
        "page_size" => {
            config.page_size = parse_number(key, value)?;
        }
        "lock_name" => {
            if value.is_empty() {
                bail!("lock_name cannot be empty");
            }
            config.lock_name = value.to_string();
        }
        "log_level" => {
            config.log_level = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, dock_capacity, page_size, lock_name, log_level",
                key
            );
        }
    }

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: expected a number", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tempfile::TempDir;

    #[test]
    fn test_set_writes_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!("data_dir = {:?}\n", dir.path().join("data")),
        )
        .unwrap();
        let output = Output::new(OutputFormat::Quiet);

        set("page_size", "30", Some(&path), &output).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("page_size = 30"));
    }

    #[test]
    fn test_set_rejects_unknown_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!("data_dir = {:?}\n", dir.path().join("data")),
        )
        .unwrap();
        let output = Output::new(OutputFormat::Quiet);

        assert!(set("sync_url", "ws://x", Some(&path), &output).is_err());
        assert!(set("page_size", "many", Some(&path), &output).is_err());
    }
}
