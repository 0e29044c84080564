//! Shelf CLI
//!
//! Command-line interface for Shelf - a paginated launchpad of links,
//! folders and dock pins.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use shelf_core::{Config, Store, StoreError};

mod commands;
mod output;
mod prompt;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "Shelf - a launchpad of links, folders and a dock")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More log output on stderr (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a link
    Add {
        /// URL to save
        url: String,
        /// Title (defaults to the URL)
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// Tags to add
        #[arg(short, long)]
        tag: Vec<String>,
        /// Target page
        #[arg(long, requires = "index")]
        page: Option<usize>,
        /// Slot on the target page
        #[arg(long, requires = "page")]
        index: Option<usize>,
        /// Put the link on a fresh page at the end
        #[arg(long, conflicts_with = "page")]
        new_page: bool,
    },
    /// List a page of the grid
    #[command(alias = "ls")]
    List {
        /// Page to show (starting at 1); all pages when omitted
        #[arg(short, long)]
        page: Option<usize>,
    },
    /// Show a link or folder
    Show {
        id: String,
    },
    /// Edit a link
    Edit {
        id: String,
        #[arg(short = 'T', long)]
        title: Option<String>,
        #[arg(short, long)]
        url: Option<String>,
        #[arg(short, long)]
        icon: Option<String>,
        /// Replace the tags (repeatable)
        #[arg(short, long)]
        tag: Option<Vec<String>>,
    },
    /// Delete links or folders
    #[command(alias = "rm")]
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Move an item to a page slot
    #[command(alias = "mv")]
    Move {
        id: String,
        /// Target page (starting at 1)
        page: usize,
        /// Slot on the page (starting at 1)
        index: usize,
    },
    /// Search links and folders (prefix with # to match a tag)
    Search {
        query: String,
    },
    /// Manage pages
    Page {
        #[command(subcommand)]
        command: PageCommands,
    },
    /// Manage folders
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Manage the dock
    Dock {
        #[command(subcommand)]
        command: Option<DockCommands>,
    },
    /// Manage the tag library
    Tags {
        #[command(subcommand)]
        command: Option<TagCommands>,
    },
    /// Import links from a JSON file (an array of {url, title, tags})
    Import {
        file: PathBuf,
        /// Only run the quota precheck
        #[arg(long)]
        dry_run: bool,
    },
    /// Repair dangling references and collect stale chunks
    Repair,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show storage usage and counts
    Status,
}

#[derive(Subcommand)]
enum PageCommands {
    /// Number of pages
    Count,
    /// Remove a page and everything on it
    #[command(alias = "rm")]
    Remove {
        /// Page to remove (starting at 1)
        page: usize,
        #[arg(short, long)]
        yes: bool,
    },
    /// Rewrite the layout from a JSON file of pages of ids
    Order {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum FolderCommands {
    /// Create a folder from existing links
    Create {
        title: String,
        /// Links to move into the folder
        items: Vec<String>,
    },
    /// Drop one item onto another, creating a folder when needed
    Merge {
        dragged: String,
        target: String,
    },
    /// Add a link to a folder
    Add {
        folder: String,
        item: String,
    },
    /// Take a link out of a folder
    #[command(alias = "rm")]
    Remove {
        folder: String,
        item: String,
    },
    Rename {
        folder: String,
        title: String,
    },
    /// Reorder the children of a folder
    Order {
        folder: String,
        items: Vec<String>,
    },
    /// Delete a folder
    Delete {
        folder: String,
        /// Keep the children on the grid
        #[arg(long)]
        keep_children: bool,
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum DockCommands {
    /// Show the visible dock
    Show,
    /// Pin a link
    Pin { id: String },
    /// Unpin a link
    Unpin { id: String },
    /// Reorder the visible pins
    Order { ids: Vec<String> },
    /// Set the dock capacity (0 disables the dock)
    Capacity { capacity: usize },
}

#[derive(Subcommand)]
enum TagCommands {
    /// List all tags
    #[command(alias = "ls")]
    List,
    Add { tag: String },
    /// Remove a tag from the library and every link
    #[command(alias = "rm")]
    Remove { tag: String },
    /// Rename a tag everywhere
    Rename { from: String, to: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, dock_capacity, page_size, lock_name, log_level)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    if let Err(err) = run(cli, &output).await {
        eprintln!("Error: {:#}", err);
        let hint = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<StoreError>())
            .and_then(StoreError::recovery_suggestion);
        if let Some(hint) = hint {
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    // Config commands work without opening the store
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(cli.config.as_ref(), output)
            }
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, cli.config.as_ref(), output)
            }
        };
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let store = Store::open_with_config(&config)
        .await
        .context("Failed to open the shelf")?;
    debug!("Opened shelf at {:?}", config.sqlite_path());

    match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::Add {
            url,
            title,
            tag,
            page,
            index,
            new_page,
        } => {
            let position = commands::item::position(page, index)?;
            commands::item::add(&store, url, title, tag, position, new_page, output).await
        }
        Commands::List { page } => commands::item::list(&store, page, output),
        Commands::Show { id } => commands::item::show(&store, &id, output),
        Commands::Edit {
            id,
            title,
            url,
            icon,
            tag,
        } => commands::item::edit(&store, &id, title, url, icon, tag, output).await,
        Commands::Delete { ids, yes } => commands::item::delete(&store, &ids, yes, output).await,
        Commands::Move { id, page, index } => {
            let position = commands::item::position(Some(page), Some(index))?;
            match position {
                Some(position) => commands::item::move_to(&store, &id, position, output).await,
                None => Ok(()),
            }
        }
        Commands::Search { query } => commands::item::search(&store, &query, output),
        Commands::Page { command } => match command {
            PageCommands::Count => commands::page::count(&store, output),
            PageCommands::Remove { page, yes } => {
                commands::page::remove(&store, page, yes, output).await
            }
            PageCommands::Order { file } => commands::page::order(&store, &file, output).await,
        },
        Commands::Folder { command } => handle_folder_command(command, &store, output).await,
        Commands::Dock { command } => handle_dock_command(command, &store, output).await,
        Commands::Tags { command } => match command {
            Some(TagCommands::List) | None => commands::tag::list(&store, output),
            Some(TagCommands::Add { tag }) => commands::tag::add(&store, &tag, output).await,
            Some(TagCommands::Remove { tag }) => {
                commands::tag::remove(&store, &tag, output).await
            }
            Some(TagCommands::Rename { from, to }) => {
                commands::tag::rename(&store, &from, &to, output).await
            }
        },
        Commands::Import { file, dry_run } => {
            commands::import::run(&store, &file, dry_run, output).await
        }
        Commands::Repair => commands::status::repair(&store, output).await,
        Commands::Status => commands::status::show(&store, &config, output).await,
    }
}

async fn handle_folder_command(command: FolderCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        FolderCommands::Create { title, items } => {
            commands::folder::create(store, &title, &items, output).await
        }
        FolderCommands::Merge { dragged, target } => {
            commands::folder::merge(store, &dragged, &target, output).await
        }
        FolderCommands::Add { folder, item } => {
            commands::folder::add(store, &folder, &item, output).await
        }
        FolderCommands::Remove { folder, item } => {
            commands::folder::remove(store, &folder, &item, output).await
        }
        FolderCommands::Rename { folder, title } => {
            commands::folder::rename(store, &folder, &title, output).await
        }
        FolderCommands::Order { folder, items } => {
            commands::folder::order(store, &folder, &items, output).await
        }
        FolderCommands::Delete {
            folder,
            keep_children,
            yes,
        } => commands::folder::delete(store, &folder, keep_children, yes, output).await,
    }
}

async fn handle_dock_command(
    command: Option<DockCommands>,
    store: &Store,
    output: &Output,
) -> Result<()> {
    match command {
        Some(DockCommands::Show) | None => commands::dock::show(store, output),
        Some(DockCommands::Pin { id }) => commands::dock::pin(store, &id, output).await,
        Some(DockCommands::Unpin { id }) => commands::dock::unpin(store, &id, output).await,
        Some(DockCommands::Order { ids }) => commands::dock::order(store, &ids, output).await,
        Some(DockCommands::Capacity { capacity }) => {
            commands::dock::capacity(store, capacity, output).await
        }
    }
}

/// Log to stderr
///
/// SHELF_LOG takes precedence, then `-v`, then `log_level` from the config.
fn init_logging(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => config.log_level.clone().unwrap_or_else(|| "warn".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let env_filter = EnvFilter::try_from_env("SHELF_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("shelf_core={},shelf_cli={}", level, level)));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
