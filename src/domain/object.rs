//! The contract every catalogue item implements.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::id::ContentId;

/// Minimal stand-in for an item that has been discovered but not loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Content identifier
    pub id: ContentId,

    /// Whether the item lives under the enabled root
    pub enabled: bool,
}

impl Placeholder {
    /// Create a new placeholder
    pub fn new(id: impl Into<ContentId>, enabled: bool) -> Self {
        Self {
            id: id.into(),
            enabled,
        }
    }
}

/// A fully materialized catalogue item.
///
/// Items are shared behind `Arc` between the manager, its wrappers and any
/// observers, so every hook takes `&self`. Implementations keep their mutable
/// state behind interior mutability.
///
/// The manager drives the lifecycle: `load` then `past_load` right after
/// construction, `reload` when the backing files changed in a way the item
/// could not absorb, and `outdate` once the item has been superseded and must
/// release whatever it subscribed to.
pub trait ContentObject: Send + Sync + 'static {
    /// Identifier, fixed for the lifetime of the object
    fn id(&self) -> &ContentId;

    /// Absolute path of the backing file or directory
    fn location(&self) -> &Path;

    /// Whether the object lives under the enabled root
    fn enabled(&self) -> bool;

    /// True if the object has unsaved edits
    fn changed(&self) -> bool {
        false
    }

    /// Id this object had before it was renamed, if any
    fn previous_id(&self) -> Option<ContentId>;

    /// Record the id this object was renamed from
    fn set_previous_id(&self, id: ContentId);

    /// Parse the on-disk representation
    fn load(&self) -> Result<()>;

    /// Called once after a successful `load`
    fn past_load(&self) {}

    /// Re-read everything from disk
    fn reload(&self) -> Result<()>;

    /// Release resources; the object is no longer part of any catalogue
    fn outdate(&self);

    /// True once `outdate` has been called
    fn is_outdated(&self) -> bool;

    /// Try to absorb a change to a single file inside the object.
    ///
    /// Returns `true` if the change was handled and no reload is needed.
    fn handle_changed_file(&self, _path: &Path) -> bool {
        false
    }

    /// Natural item order
    fn compare(&self, other: &Self) -> Ordering
    where
        Self: Sized,
    {
        self.id().cmp(other.id())
    }
}
