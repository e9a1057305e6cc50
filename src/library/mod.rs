//! File-backed content catalogues.
//!
//! Items live as entries (directories or files) under an enabled root and,
//! optionally, a disabled root. Deleted items go to a recycle bin.
//!
//! # Storage Layout
//!
//! ```text
//! ~/.contentlib/
//! ├── config.yaml
//! ├── content/              # enabled root
//! │   └── <id>/
//! │       └── manifest.json # optional metadata (FolderKind)
//! ├── content-disabled/     # disabled root
//! └── recycle/
//!     └── <YYYYmmdd-HHMMSS>-<suffix>/
//! ```

pub mod directories;
pub mod file_manager;
pub mod folder;
pub mod fs_ops;
pub mod recycle;

pub use directories::{ContentDirectories, Directories, EntryKind};
pub use file_manager::{
    default_validate_id, kind_from_fn, FileKind, FileManager, FileSource, FnKind, ObjectInit,
    UnsavedHandler,
};
pub use folder::{FolderItem, FolderKind, FolderManifest, MANIFEST_FILE};
pub use recycle::{RecycleBin, Recycler};
