//! Error taxonomy for catalogue managers.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::ContentId;

/// Failure to materialize a single item.
///
/// `Clone` so one in-flight load can hand its outcome to every caller
/// awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to load {id}: {reason}")]
pub struct LoadError {
    pub id: ContentId,
    pub reason: String,
}

impl LoadError {
    pub fn new(id: ContentId, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }

    /// Flatten an error chain into a load failure
    pub fn from_anyhow(id: ContentId, error: &anyhow::Error) -> Self {
        Self::new(id, format!("{:#}", error))
    }
}

/// Errors that can occur while scanning, loading or mutating a catalogue
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Scan already in progress")]
    AlreadyScanning,

    #[error("Scan failed: {reason}")]
    Scan { reason: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Item not found: {0}")]
    NotFound(ContentId),

    #[error("Item already exists: {0}")]
    Conflict(ContentId),

    #[error("Invalid id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Place is taken: {0}")]
    PlaceTaken(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Disabling is not supported for this catalogue")]
    DisablingNotSupported,

    #[error("Location still exists after recycling: {0}")]
    StillPresent(PathBuf),

    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl CatalogError {
    /// Wrap an IO error with a description of what was attempted
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CatalogError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors a user can act on (pick another name, free a slot)
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            CatalogError::Conflict(_)
                | CatalogError::InvalidId { .. }
                | CatalogError::PlaceTaken(_)
                | CatalogError::DisablingNotSupported
        )
    }
}

/// Result type for catalogue operations
pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_source() {
        let err = CatalogError::io(
            "Failed to move /a to /b",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );

        assert_eq!(err.to_string(), "Failed to move /a to /b: denied");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "denied");
    }

    #[test]
    fn test_load_error_from_anyhow_keeps_chain() {
        let inner = anyhow::anyhow!("bad json").context("Failed to read manifest");
        let err = LoadError::from_anyhow(ContentId::new("abc"), &inner);
        assert_eq!(err.reason, "Failed to read manifest: bad json");
    }

    #[test]
    fn test_user_actionable() {
        assert!(CatalogError::Conflict(ContentId::new("a")).is_user_actionable());
        assert!(!CatalogError::AlreadyScanning.is_user_actionable());
    }
}
