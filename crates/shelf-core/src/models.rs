//! Data models for Shelf
//!
//! Defines the flat top-level `Entry` type, the link and folder payloads
//! stored inside chunk sets, and the fixed system pseudo-items.
//!
//! Ids are plain strings with a class prefix so that the persisted entry
//! list stays a flat array of strings:
//!
//! - `qlink_<suffix>` - a link item
//! - `qfolder_<suffix>` - a folder
//! - `qsys_add` / `qsys_settings` - system pseudo-items
//! - `__PAGE_BREAK__` - explicit page boundary

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use url::Url;
use uuid::Uuid;

use crate::error::ValidationError;

/// Sentinel forcing a new page
pub const PAGE_BREAK: &str = "__PAGE_BREAK__";
pub const LINK_PREFIX: &str = "qlink_";
pub const FOLDER_PREFIX: &str = "qfolder_";

/// "Add shortcut" tile
pub const SYSTEM_ADD: &str = "qsys_add";
/// Settings tile
pub const SYSTEM_SETTINGS: &str = "qsys_settings";
/// System pseudo-items that must always be present at top level
pub const SYSTEM_IDS: [&str; 2] = [SYSTEM_ADD, SYSTEM_SETTINGS];

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_URL_LEN: usize = 2000;
pub const MAX_ICON_LEN: usize = 2000;
pub const MAX_TAGS_PER_ITEM: usize = 5;
pub const MAX_TAG_LEN: usize = 10;
pub const MAX_FOLDER_TITLE_LEN: usize = 50;
pub const MAX_FOLDER_CHILDREN: usize = 24;

/// URL schemes a link may point at
pub const ALLOWED_PROTOCOLS: &[&str] = &[
    "http",
    "https",
    "ftp",
    "file",
    "chrome",
    "chrome-extension",
    "edge",
    "about",
];

/// One slot in the flat top-level ordering
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
    Item(String),
    Folder(String),
    System(String),
    PageBreak,
}

impl Entry {
    /// Parse a persisted entry string; unknown shapes yield `None`
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == PAGE_BREAK {
            return Some(Entry::PageBreak);
        }
        Self::from_id(raw)
    }

    /// Classify a concrete id (never a page break)
    pub fn from_id(id: &str) -> Option<Self> {
        if SYSTEM_IDS.contains(&id) {
            Some(Entry::System(id.to_string()))
        } else if is_link_id(id) {
            Some(Entry::Item(id.to_string()))
        } else if is_folder_id(id) {
            Some(Entry::Folder(id.to_string()))
        } else {
            None
        }
    }

    /// The concrete id, or `None` for a page break
    pub fn id(&self) -> Option<&str> {
        match self {
            Entry::Item(id) | Entry::Folder(id) | Entry::System(id) => Some(id),
            Entry::PageBreak => None,
        }
    }

    /// Persisted string form
    pub fn as_str(&self) -> &str {
        self.id().unwrap_or(PAGE_BREAK)
    }

    pub fn is_break(&self) -> bool {
        matches!(self, Entry::PageBreak)
    }

    pub fn is_item(&self, id: &str) -> bool {
        self.id() == Some(id)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn has_valid_suffix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix).is_some_and(|suffix| {
        !suffix.is_empty()
            && suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

pub fn is_link_id(id: &str) -> bool {
    has_valid_suffix(id, LINK_PREFIX)
}

pub fn is_folder_id(id: &str) -> bool {
    has_valid_suffix(id, FOLDER_PREFIX)
}

pub fn is_system_id(id: &str) -> bool {
    SYSTEM_IDS.contains(&id)
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Generate a fresh link id
pub fn new_link_id() -> String {
    format!("{}{}", LINK_PREFIX, random_suffix())
}

/// Generate a fresh folder id
pub fn new_folder_id() -> String {
    format!("{}{}", FOLDER_PREFIX, random_suffix())
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A saved shortcut
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: i64,
}

impl Link {
    /// Create a new link with a fresh id; the title defaults to the URL
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_id(new_link_id(), url)
    }

    /// Create a link with a specific id (for loading or importing)
    pub fn with_id(id: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: id.into(),
            title: url.clone(),
            url,
            icon: String::new(),
            tags: Vec::new(),
            created_at: now_millis(),
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_icon(&mut self, icon: impl Into<String>) {
        self.icon = icon.into();
    }

    /// Add a tag (case-insensitive duplicates are ignored)
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            self.tags.push(tag);
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Check every field limit and normalize the tag list in place
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        if !is_link_id(&self.id) {
            return Err(ValidationError::InvalidId(self.id.clone()));
        }
        self.title = self.title.trim().to_string();
        check_len("title", &self.title, MAX_TITLE_LEN)?;
        self.url = self.url.trim().to_string();
        check_len("url", &self.url, MAX_URL_LEN)?;
        validate_url(&self.url)?;
        check_len("icon", &self.icon, MAX_ICON_LEN)?;
        self.tags = crate::tags::normalize_item_tags(&self.tags)?;
        Ok(())
    }
}

/// Fields accepted when creating a link
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewLink {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Build and validate a link with a fresh id
    pub fn into_link(self) -> Result<Link, ValidationError> {
        let mut link = Link::new(self.url);
        if !self.title.trim().is_empty() {
            link.title = self.title;
        }
        link.icon = self.icon;
        link.tags = self.tags;
        link.validate()?;
        Ok(link)
    }
}

/// Partial update of a link; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdate {
    pub title: Option<String>,
    pub url: Option<String>,
    pub icon: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl LinkUpdate {
    /// Apply to a copy of `link` and validate the result
    pub fn apply_to(&self, link: &Link) -> Result<Link, ValidationError> {
        let mut updated = link.clone();
        if let Some(ref title) = self.title {
            updated.title = title.clone();
        }
        if let Some(ref url) = self.url {
            updated.url = url.clone();
        }
        if let Some(ref icon) = self.icon {
            updated.icon = icon.clone();
        }
        if let Some(ref tags) = self.tags {
            updated.tags = tags.clone();
        }
        updated.validate()?;
        Ok(updated)
    }
}

/// Marker serialized as `"type": "folder"`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FolderKind {
    #[default]
    Folder,
}

/// A folder of links; itself one top-level entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FolderKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub created_at: i64,
}

impl Folder {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FolderKind::Folder,
            title: title.into(),
            children: Vec::new(),
            created_at: now_millis(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.children.iter().any(|c| c == id)
    }

    pub fn is_full(&self) -> bool {
        self.children.len() >= MAX_FOLDER_CHILDREN
    }
}

/// What a chunk stores per id
///
/// Folders are recognised by their `type` field; anything else is a link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ItemPayload {
    Folder(Folder),
    Link(Link),
}

impl ItemPayload {
    pub fn id(&self) -> &str {
        match self {
            ItemPayload::Folder(folder) => &folder.id,
            ItemPayload::Link(link) => &link.id,
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            ItemPayload::Link(link) => Some(link),
            ItemPayload::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            ItemPayload::Folder(folder) => Some(folder),
            ItemPayload::Link(_) => None,
        }
    }

    pub fn as_folder_mut(&mut self) -> Option<&mut Folder> {
        match self {
            ItemPayload::Folder(folder) => Some(folder),
            ItemPayload::Link(_) => None,
        }
    }
}

impl From<Link> for ItemPayload {
    fn from(link: Link) -> Self {
        ItemPayload::Link(link)
    }
}

impl From<Folder> for ItemPayload {
    fn from(folder: Folder) -> Self {
        ItemPayload::Folder(folder)
    }
}

/// Display overrides for a system pseudo-item, stored under its own key
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl SystemItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Reject values longer than `max` characters
pub fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { field, len, max });
    }
    Ok(())
}

/// Validate a URL against the protocol allow-list
///
/// The URL parser silently drops tabs and newlines, so raw whitespace and
/// control characters are rejected before parsing.
pub fn validate_url(url: &str) -> Result<(), ValidationError> {
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidUrl(url.to_string()));
    }
    let parsed = Url::parse(url).map_err(|_| ValidationError::InvalidUrl(url.to_string()))?;

    let scheme = parsed.scheme();
    if !ALLOWED_PROTOCOLS.contains(&scheme) {
        return Err(ValidationError::UnsupportedProtocol(scheme.to_string()));
    }

    // Network schemes need a host
    if matches!(scheme, "http" | "https" | "ftp")
        && parsed.host_str().map_or(true, str::is_empty)
    {
        return Err(ValidationError::InvalidUrl(url.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_parse() {
        assert_eq!(Entry::parse(PAGE_BREAK), Some(Entry::PageBreak));
        assert_eq!(
            Entry::parse("qlink_abc"),
            Some(Entry::Item("qlink_abc".to_string()))
        );
        assert_eq!(
            Entry::parse("qfolder_1"),
            Some(Entry::Folder("qfolder_1".to_string()))
        );
        assert_eq!(
            Entry::parse(SYSTEM_ADD),
            Some(Entry::System(SYSTEM_ADD.to_string()))
        );
        assert_eq!(Entry::parse("qlink_"), None);
        assert_eq!(Entry::parse("qlink_a b"), None);
        assert_eq!(Entry::parse("random"), None);
        assert_eq!(Entry::from_id(PAGE_BREAK), None);
    }

    #[test]
    fn test_entry_serializes_as_string() {
        let entries = vec![
            Entry::Item("qlink_a".to_string()),
            Entry::PageBreak,
            Entry::Folder("qfolder_b".to_string()),
        ];
        let json = serde_json::to_string(&entries).unwrap();
        assert_eq!(json, r#"["qlink_a","__PAGE_BREAK__","qfolder_b"]"#);
    }

    #[test]
    fn test_generated_ids() {
        let link_id = new_link_id();
        let folder_id = new_folder_id();
        assert!(is_link_id(&link_id));
        assert!(is_folder_id(&folder_id));
        assert_ne!(link_id, new_link_id());
    }

    #[test]
    fn test_link_new_defaults_title_to_url() {
        let link = Link::new("https://example.com");
        assert_eq!(link.title, "https://example.com");
        assert!(link.tags.is_empty());
        assert!(link.created_at > 0);
    }

    #[test]
    fn test_link_tags_case_insensitive() {
        let mut link = Link::new("https://example.com");
        link.add_tag("Rust");
        link.add_tag("rust");
        assert_eq!(link.tags, vec!["Rust"]);
        assert!(link.has_tag("RUST"));
    }

    #[test]
    fn test_validate_url_protocols() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("HTTP://example.com/path").is_ok());
        assert!(validate_url("chrome://extensions").is_ok());
        assert!(validate_url("about:blank").is_ok());
        assert!(matches!(
            validate_url("javascript:alert(1)"),
            Err(ValidationError::UnsupportedProtocol(_))
        ));
        assert!(matches!(
            validate_url("no-scheme"),
            Err(ValidationError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("https://"),
            Err(ValidationError::InvalidUrl(_))
        ));
        assert!(validate_url("file:///home/me/notes.txt").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_malformed() {
        for url in [
            "http://exa mple.com",
            "https://:80",
            "https://[::1",
            "http://a\tb/",
            "https://example.com/\n",
            " https://example.com",
        ] {
            assert!(
                matches!(validate_url(url), Err(ValidationError::InvalidUrl(_))),
                "{:?} was accepted",
                url
            );
        }
        assert!(validate_url("https://[::1]:8080/").is_ok());
    }

    #[test]
    fn test_new_link_validation() {
        let link = NewLink::new("https://rust-lang.org")
            .titled("  Rust  ")
            .tagged("lang")
            .into_link()
            .unwrap();
        assert_eq!(link.title, "Rust");
        assert_eq!(link.tags, vec!["lang"]);

        let long_title = "x".repeat(MAX_TITLE_LEN + 1);
        let err = NewLink::new("https://example.com")
            .titled(long_title)
            .into_link()
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { field: "title", .. }));

        let long_url = format!("https://example.com/{}", "a".repeat(MAX_URL_LEN));
        assert!(NewLink::new(long_url).into_link().is_err());
    }

    #[test]
    fn test_link_update() {
        let link = Link::new("https://example.com");
        let update = LinkUpdate {
            title: Some("Example".to_string()),
            ..LinkUpdate::default()
        };
        let updated = update.apply_to(&link).unwrap();
        assert_eq!(updated.title, "Example");
        assert_eq!(updated.url, link.url);
        assert_eq!(updated.id, link.id);

        let bad = LinkUpdate {
            url: Some("ftp:nohost".to_string()),
            ..LinkUpdate::default()
        };
        assert!(bad.apply_to(&link).is_err());
    }

    #[test]
    fn test_payload_roundtrip_distinguishes_folders() {
        let mut folder = Folder::new("qfolder_x", "Work");
        folder.children.push("qlink_a".to_string());
        let link = Link::with_id("qlink_a", "https://example.com");

        let folder_json = serde_json::to_value(ItemPayload::from(folder.clone())).unwrap();
        assert_eq!(folder_json["type"], "folder");
        let link_json = serde_json::to_value(ItemPayload::from(link.clone())).unwrap();
        assert!(link_json.get("type").is_none());

        let parsed: ItemPayload = serde_json::from_value(folder_json).unwrap();
        assert_eq!(parsed.as_folder(), Some(&folder));
        let parsed: ItemPayload = serde_json::from_value(link_json).unwrap();
        assert_eq!(parsed.as_link(), Some(&link));
    }

    #[test]
    fn test_link_payload_with_explicit_type() {
        let value = serde_json::json!({
            "id": "qlink_t",
            "type": "link",
            "title": "T",
            "url": "https://t.example"
        });
        let parsed: ItemPayload = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.as_link().map(|l| l.id.as_str()), Some("qlink_t"));
    }
}
