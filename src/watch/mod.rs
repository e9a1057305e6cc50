//! Live reconciliation of file-backed catalogues.
//!
//! - [`DirectoryWatcher`]: OS events for the catalogue roots
//! - [`WatchingTask`]: per-object debouncer
//! - [`ChangeShield`]: suppresses events caused by our own operations
//! - [`WatchedManager`]: applies coalesced changes to the catalogue

pub mod listener;
pub mod manager;
pub mod shield;
pub mod task;

pub use listener::{DirectoryListener, DirectoryWatcher};
pub use manager::{WatchSettings, WatchedManager};
pub use shield::{ChangeShield, ShieldGuard};
pub use task::{ChangeHandler, WatchingTask};
