//! Domain types for content catalogues.
//!
//! This module contains the vocabulary shared by every manager:
//! - ContentId: case-insensitive item identity
//! - Placeholder / ContentObject: unloaded and loaded item shapes
//! - ChangeKind / RawFsEvent / CoalescedChange: filesystem change events

pub mod change;
pub mod id;
pub mod object;

// Re-export commonly used types
pub use change::{ChangeKind, CoalescedChange, RawFsEvent};
pub use id::{location_key, same_location, ContentId};
pub use object::{ContentObject, Placeholder};
