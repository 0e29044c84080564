//! Change notifications emitted by the store

use serde::{Deserialize, Serialize};

use crate::commit::Settings;
use crate::entries::Position;

/// What happened to a folder in a `folderChanged` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FolderAction {
    Added,
    Removed,
    Renamed,
    Reordered,
    Dissolved,
}

/// One notification, serialized as `{"event": "<name>", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StoreEvent {
    ItemAdded {
        item_id: String,
        position: Option<Position>,
    },
    ItemUpdated {
        item_id: String,
    },
    ItemDeleted {
        item_id: String,
    },
    ItemMoved {
        item_id: String,
        position: Option<Position>,
    },
    ItemsBulkAdded {
        item_ids: Vec<String>,
    },
    ItemsBulkDeleted {
        item_ids: Vec<String>,
    },
    PageAdded {
        page: usize,
    },
    PageRemoved {
        page: usize,
    },
    /// Entry order changed; reload everything
    Reordered,
    DockChanged {
        pins: Vec<String>,
    },
    TagsChanged {
        tags: Vec<String>,
    },
    FolderCreated {
        folder_id: String,
        child_ids: Vec<String>,
    },
    FolderChanged {
        folder_id: String,
        action: FolderAction,
    },
    FolderDeleted {
        folder_id: String,
    },
    SettingsChanged {
        settings: Settings,
    },
}

impl StoreEvent {
    /// Event name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::ItemAdded { .. } => "itemAdded",
            StoreEvent::ItemUpdated { .. } => "itemUpdated",
            StoreEvent::ItemDeleted { .. } => "itemDeleted",
            StoreEvent::ItemMoved { .. } => "itemMoved",
            StoreEvent::ItemsBulkAdded { .. } => "itemsBulkAdded",
            StoreEvent::ItemsBulkDeleted { .. } => "itemsBulkDeleted",
            StoreEvent::PageAdded { .. } => "pageAdded",
            StoreEvent::PageRemoved { .. } => "pageRemoved",
            StoreEvent::Reordered => "reordered",
            StoreEvent::DockChanged { .. } => "dockChanged",
            StoreEvent::TagsChanged { .. } => "tagsChanged",
            StoreEvent::FolderCreated { .. } => "folderCreated",
            StoreEvent::FolderChanged { .. } => "folderChanged",
            StoreEvent::FolderDeleted { .. } => "folderDeleted",
            StoreEvent::SettingsChanged { .. } => "settingsChanged",
        }
    }
}
