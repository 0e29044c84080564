//! Engine error types
//!
//! Validation failures are rejected locally before anything is written.
//! Storage failures come from the sync area and are retried by the commit
//! engine when they look transient.

use thiserror::Error;

use crate::commit::CommitError;
use crate::storage::StorageError;

/// A mutation was refused before touching storage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid id: '{0}'")]
    InvalidId(String),

    #[error("{field} is too long ({len} > {max} characters)")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Invalid URL: '{0}'")]
    InvalidUrl(String),

    #[error("URL protocol '{0}' is not allowed")]
    UnsupportedProtocol(String),

    #[error("Too many tags ({count} > {max})")]
    TooManyTags { count: usize, max: usize },

    #[error("Tag '{tag}' is longer than {max} characters")]
    TagTooLong { tag: String, max: usize },

    #[error("System item '{0}' cannot be deleted, moved into a folder or pinned")]
    SystemItem(String),

    #[error("'{0}' is a folder")]
    IsFolder(String),

    #[error("'{0}' is not a folder")]
    NotAFolder(String),

    #[error("Folder '{0}' is full")]
    FolderFull(String),

    #[error("A folder needs at least one valid child")]
    EmptyFolder,

    #[error("Cannot merge '{0}' into itself")]
    SelfMerge(String),

    #[error("Not found: '{0}'")]
    NotFound(String),
}

/// Errors returned by the `Store` facade
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StoreError {
    /// True when the operation was refused by validation
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }

    /// Hint for the user when the failure came from the storage area
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::Validation(_) => None,
            StoreError::Commit(e) => e.storage_error().recovery_suggestion(),
            StoreError::Storage(e) => e.recovery_suggestion(),
        }
    }
}

/// Result type for facade operations
pub type StoreResult<T> = Result<T, StoreError>;
