//! contentlib - Lazily loaded, self-reconciling content catalogues
//!
//! A catalogue is a list of items discovered cheaply (scan) and
//! materialized on demand (load). File-backed catalogues add structural
//! operations and stay in sync with the disk through a debounced watcher.
//!
//! # Architecture
//!
//! - Every id has one `Wrapper`; at most one load per id ever runs
//! - The `WrapperCollection` is only mutated through the manager
//! - Our own file operations raise a shield so the watcher ignores them
//!
//! # Modules
//!
//! - `domain`: ids, placeholders, the `ContentObject` contract, change kinds
//! - `core`: Wrapper, WrapperCollection, BaseManager, AsyncScanManager
//! - `library`: directories, recycle bin, FileManager, folder items
//! - `watch`: OS watcher, debouncer, shield, WatchedManager
//! - `config`: YAML/env configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # List the catalogue
//! contentlib list
//!
//! # Move an item to the disabled root
//! contentlib toggle <id>
//!
//! # Follow changes on disk
//! contentlib watch
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod library;
pub mod watch;

// Re-export main types at crate root for convenience
pub use crate::core::{
    AsyncContentSource, AsyncScanManager, BaseManager, CatalogError, CollectionEvent,
    ContentSource, LoadError, ManagerSettings, ManagerState, ScanStatus, Wrapper,
    WrapperCollection,
};
pub use domain::{ChangeKind, ContentId, ContentObject, Placeholder, RawFsEvent};
pub use library::{
    ContentDirectories, Directories, FileKind, FileManager, FolderItem, FolderKind, ObjectInit,
    RecycleBin, Recycler,
};
pub use watch::{ChangeShield, WatchSettings, WatchedManager};
