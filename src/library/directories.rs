//! Mapping between catalogue roots on disk and content ids.
//!
//! # Layout
//!
//! ```text
//! <enabled>/
//! ├── aaa/            # item "aaa", enabled
//! ├── aaa.preview.png # attached file of "aaa"
//! └── bbb/
//! <disabled>/
//! └── ccc/            # item "ccc", disabled
//! ```

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{CatalogError, Result};
use crate::domain::ContentId;

/// Maps paths to ids and back for one catalogue
pub trait Directories: Send + Sync + 'static {
    /// Every item location currently present under the roots
    fn content_entries(&self) -> std::io::Result<Vec<PathBuf>>;

    /// Id of the item at a location
    fn get_id(&self, location: &Path) -> Option<ContentId>;

    /// Whether an object-level location counts as an item, by the same rule
    /// `content_entries` uses. Missing locations are judged by name alone.
    fn is_entry(&self, location: &Path) -> bool;

    /// Object-level location for any path inside the catalogue, and whether
    /// the path points inside the object rather than at it
    fn location_by_filename(&self, path: &Path) -> Option<(PathBuf, bool)>;

    /// True unless the location is under the disabled root
    fn check_if_enabled(&self, location: &Path) -> bool;

    /// Where an item with this id lives (or would live)
    fn get_location(&self, id: &ContentId, enabled: bool) -> Result<PathBuf>;

    /// Whether items can be moved to a disabled root
    fn supports_disabling(&self) -> bool;

    /// Directories to watch
    fn roots(&self) -> Vec<PathBuf>;
}

/// What counts as an item inside a root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EntryKind {
    /// Every subdirectory is an item
    Directories,

    /// Every file with this extension is an item
    Files { extension: String },
}

impl Default for EntryKind {
    fn default() -> Self {
        EntryKind::Directories
    }
}

/// Enabled root plus an optional disabled root
#[derive(Debug, Clone)]
pub struct ContentDirectories {
    enabled: PathBuf,
    disabled: Option<PathBuf>,
    kind: EntryKind,
}

impl ContentDirectories {
    pub fn new(enabled: impl Into<PathBuf>, disabled: Option<PathBuf>) -> Self {
        Self {
            enabled: enabled.into(),
            disabled,
            kind: EntryKind::Directories,
        }
    }

    /// Change what counts as an item
    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn enabled_root(&self) -> &Path {
        &self.enabled
    }

    pub fn disabled_root(&self) -> Option<&Path> {
        self.disabled.as_deref()
    }

    /// Create missing roots
    pub fn ensure_roots(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.enabled)?;
        if let Some(disabled) = &self.disabled {
            std::fs::create_dir_all(disabled)?;
        }
        Ok(())
    }

    /// `is_dir` is `None` when the path no longer exists
    fn matches_entry(&self, path: &Path, is_dir: Option<bool>) -> bool {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if hidden {
            return false;
        }

        match &self.kind {
            EntryKind::Directories => is_dir.unwrap_or(true),
            EntryKind::Files { extension } => {
                is_dir != Some(true)
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
                        .unwrap_or(false)
            }
        }
    }

    fn entries_in(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            let path = entry.path();
            if self.matches_entry(&path, Some(is_dir)) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    fn all_roots(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.enabled).chain(self.disabled.iter())
    }
}

impl Directories for ContentDirectories {
    fn content_entries(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = self.entries_in(&self.enabled)?;
        if let Some(disabled) = &self.disabled {
            entries.extend(self.entries_in(disabled)?);
        }
        Ok(entries)
    }

    fn is_entry(&self, location: &Path) -> bool {
        match self.location_by_filename(location) {
            Some((_, false)) => {}
            _ => return false,
        }

        match std::fs::metadata(location) {
            Ok(meta) => self.matches_entry(location, Some(meta.is_dir())),
            Err(_) => self.matches_entry(location, None),
        }
    }

    fn get_id(&self, location: &Path) -> Option<ContentId> {
        let (object, _) = self.location_by_filename(location)?;
        ContentId::from_location(&object)
    }

    fn location_by_filename(&self, path: &Path) -> Option<(PathBuf, bool)> {
        for root in self.all_roots() {
            if let Some(relative) = strip_root(path, root) {
                let mut components = relative.components();
                let first = match components.next() {
                    Some(Component::Normal(name)) => name,
                    _ => continue,
                };
                let inner = components.next().is_some();
                return Some((root.join(first), inner));
            }
        }
        None
    }

    fn check_if_enabled(&self, location: &Path) -> bool {
        match &self.disabled {
            Some(disabled) => strip_root(location, disabled).is_none(),
            None => true,
        }
    }

    fn get_location(&self, id: &ContentId, enabled: bool) -> Result<PathBuf> {
        let root = if enabled {
            &self.enabled
        } else {
            self.disabled
                .as_ref()
                .ok_or(CatalogError::DisablingNotSupported)?
        };
        Ok(root.join(id.as_str()))
    }

    fn supports_disabling(&self) -> bool {
        self.disabled.is_some()
    }

    fn roots(&self) -> Vec<PathBuf> {
        self.all_roots().cloned().collect()
    }
}

/// Path relative to `root`, comparing components case-insensitively.
/// `None` if the path is not strictly below the root.
fn strip_root(path: &Path, root: &Path) -> Option<PathBuf> {
    let mut path_components = path.components();

    for root_component in root.components() {
        let next = path_components.next()?;
        let same = next
            .as_os_str()
            .to_string_lossy()
            .eq_ignore_ascii_case(&root_component.as_os_str().to_string_lossy());
        if !same {
            return None;
        }
    }

    let rest: PathBuf = path_components.collect();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest)
    }
}
