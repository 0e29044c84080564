//! Storage error handling
//!
//! Provides typed errors for sync-area operations, with a classification of
//! which failures are worth retrying.

use std::io;

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// A single value or the whole area is over quota
    #[error("Sync quota exceeded{}: {details}", key_suffix(.key))]
    QuotaExceeded {
        key: Option<String>,
        details: String,
    },

    /// The area did not answer in time
    #[error("Storage operation timed out: {0}")]
    Timeout(String),

    /// The area could not reach its backing service
    #[error("Network error: {0}")]
    Network(String),

    /// Any other failure reported by the area, message preserved
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Classify a message reported by a storage area
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("quota") {
            StorageError::QuotaExceeded {
                key: None,
                details: message,
            }
        } else if lower.contains("timeout") || lower.contains("timed out") {
            StorageError::Timeout(message)
        } else if lower.contains("network") || lower.contains("connection") {
            StorageError::Network(message)
        } else {
            StorageError::Backend(message)
        }
    }

    /// Check if retrying the whole read-modify-write cycle may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::QuotaExceeded { .. }
            | StorageError::Timeout(_)
            | StorageError::Network(_) => true,
            StorageError::Backend(msg) => is_transient_message(msg),
            StorageError::Database(e) => is_transient_message(&e.to_string()),
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            StorageError::Serialization(_) => false,
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::QuotaExceeded { .. } => {
                Some("Remove unused shortcuts or shorten titles and icons to free sync quota.")
            }
            StorageError::Timeout(_) | StorageError::Network(_) => {
                Some("Check the connection to the sync service and try again.")
            }
            StorageError::Database(_) => {
                Some("The local database may be locked by another process; try again shortly.")
            }
            _ => None,
        }
    }
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_deref()
        .map(|k| format!(" for '{k}'"))
        .unwrap_or_default()
}

/// Message heuristics shared by every backend
fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("quota")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("network")
        || msg.contains("database is locked")
        || msg.contains("busy")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_classification() {
        assert!(matches!(
            StorageError::from_message("QUOTA_BYTES quota exceeded"),
            StorageError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            StorageError::from_message("request timed out"),
            StorageError::Timeout(_)
        ));
        assert!(matches!(
            StorageError::from_message("Network unreachable"),
            StorageError::Network(_)
        ));
        assert!(matches!(
            StorageError::from_message("disk on fire"),
            StorageError::Backend(_)
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::from_message("quota exceeded").is_transient());
        assert!(StorageError::Timeout("slow".to_string()).is_transient());
        assert!(!StorageError::Backend("invalid key".to_string()).is_transient());
        assert!(StorageError::Backend("server busy".to_string()).is_transient());

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!StorageError::from(io_err).is_transient());
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "slow disk");
        assert!(StorageError::from(io_err).is_transient());
    }

    #[test]
    fn test_quota_display_includes_key() {
        let err = StorageError::QuotaExceeded {
            key: Some("qcs0_0".to_string()),
            details: "8300 > 8192 bytes".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("qcs0_0"));
        assert!(msg.contains("8300"));
        assert!(err.recovery_suggestion().is_some());
    }
}
