//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use shelf_core::{Folder, ItemPayload, Link, PageItem};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print a single link
    pub fn print_link(&self, link: &Link) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:      {}", link.id);
                println!("Title:   {}", link.title);
                println!("URL:     {}", link.url);
                if !link.icon.is_empty() {
                    println!("Icon:    {}", link.icon);
                }
                if !link.tags.is_empty() {
                    println!("Tags:    {}", link.tags.join(", "));
                }
                if let Some(created) = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(link.created_at) {
                    println!("Created: {}", created.format("%Y-%m-%d %H:%M"));
                }
            }
            OutputFormat::Json => self.json(link),
            OutputFormat::Quiet => println!("{}", link.id),
        }
    }

    /// Print a folder with its resolved children
    pub fn print_folder(&self, folder: &Folder, children: &[Link]) {
        match self.format {
            OutputFormat::Human => {
                println!("{} | {} ({} items)", folder.id, folder.title, children.len());
                for link in children {
                    println!("  {} | {}", link.id, truncate(&link.title, 40));
                }
            }
            OutputFormat::Json => self.json(&serde_json::json!({
                "folder": folder,
                "children": children,
            })),
            OutputFormat::Quiet => println!("{}", folder.id),
        }
    }

    /// Print one page of the grid
    pub fn print_page(&self, page: usize, page_count: usize, items: &[PageItem]) {
        match self.format {
            OutputFormat::Human => {
                println!("── Page {} of {} ──", page + 1, page_count.max(1));
                if items.is_empty() {
                    println!("(empty)");
                    return;
                }
                for item in items {
                    match item {
                        PageItem::Link(link) => println!(
                            "{} | {} | {}",
                            link.id,
                            truncate(&link.title, 35),
                            truncate(&link.url, 45)
                        ),
                        PageItem::Folder { folder, children } => println!(
                            "{} | [{}] ({} items)",
                            folder.id,
                            truncate(&folder.title, 35),
                            children.len()
                        ),
                        PageItem::System(system) => println!(
                            "{} | <{}>",
                            system.id,
                            system.title.as_deref().unwrap_or("system")
                        ),
                    }
                }
            }
            OutputFormat::Json => self.json(&serde_json::json!({
                "page": page,
                "pageCount": page_count,
                "items": items,
            })),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id());
                }
            }
        }
    }

    /// Print search results
    pub fn print_items(&self, items: &[ItemPayload]) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("No items found.");
                    return;
                }
                for item in items {
                    match item {
                        ItemPayload::Link(link) => println!(
                            "{} | {} | {}",
                            link.id,
                            truncate(&link.title, 35),
                            truncate(&link.url, 45)
                        ),
                        ItemPayload::Folder(folder) => println!(
                            "{} | [{}] ({} items)",
                            folder.id,
                            truncate(&folder.title, 35),
                            folder.children.len()
                        ),
                    }
                }
                println!("\n{} item(s)", items.len());
            }
            OutputFormat::Json => self.json(items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id());
                }
            }
        }
    }

    /// Print the visible dock
    pub fn print_dock(&self, pins: &[Link], capacity: usize) {
        match self.format {
            OutputFormat::Human => {
                if capacity == 0 {
                    println!("Dock is disabled.");
                    return;
                }
                println!("Dock ({}/{})", pins.len(), capacity);
                for (slot, link) in pins.iter().enumerate() {
                    println!("{:>2}. {} | {}", slot + 1, link.id, truncate(&link.title, 40));
                }
            }
            OutputFormat::Json => self.json(&serde_json::json!({
                "capacity": capacity,
                "pins": pins,
            })),
            OutputFormat::Quiet => {
                for link in pins {
                    println!("{}", link.id);
                }
            }
        }
    }

    /// Print the tag library
    pub fn print_tags(&self, tags: &[String]) {
        match self.format {
            OutputFormat::Human => {
                if tags.is_empty() {
                    println!("No tags found.");
                    return;
                }
                for tag in tags {
                    println!("{}", tag);
                }
                println!("\n{} tag(s)", tags.len());
            }
            OutputFormat::Json => self.json(tags),
            OutputFormat::Quiet => {
                for tag in tags {
                    println!("{}", tag);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
