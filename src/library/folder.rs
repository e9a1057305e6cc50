//! Stock content type: one directory per item with an optional
//! `manifest.json` describing it.
//!
//! ```json
//! { "name": "Track Day Pack", "version": "1.2", "tags": ["gt3"] }
//! ```

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::domain::{same_location, ContentId, ContentObject};

use super::file_manager::{FileKind, ObjectInit};

/// Name of the metadata file inside an item directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Metadata stored next to the content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderManifest {
    /// Display name (defaults to the id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
struct FolderData {
    manifest: FolderManifest,
    file_count: usize,
    loaded_at: Option<DateTime<Utc>>,
}

/// A directory-backed catalogue item
#[derive(Debug)]
pub struct FolderItem {
    id: ContentId,
    enabled: bool,
    location: PathBuf,
    previous_id: Mutex<Option<ContentId>>,
    data: RwLock<FolderData>,
    changed: AtomicBool,
    outdated: AtomicBool,
}

impl FolderItem {
    pub fn new(init: ObjectInit) -> Self {
        Self {
            id: init.id,
            enabled: init.enabled,
            location: init.location,
            previous_id: Mutex::new(None),
            data: RwLock::new(FolderData::default()),
            changed: AtomicBool::new(false),
            outdated: AtomicBool::new(false),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.location.join(MANIFEST_FILE)
    }

    /// Display name: manifest name, falling back to the id
    pub fn name(&self) -> String {
        self.data
            .read()
            .manifest
            .name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn manifest(&self) -> FolderManifest {
        self.data.read().manifest.clone()
    }

    /// Files inside the item, counted recursively at load time
    pub fn file_count(&self) -> usize {
        self.data.read().file_count
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.data.read().loaded_at
    }

    /// Change the display name in memory; call [`FolderItem::save`] to persist
    pub fn set_name(&self, name: impl Into<String>) {
        self.data.write().manifest.name = Some(name.into());
        self.changed.store(true, AtomicOrdering::SeqCst);
    }

    /// Write the manifest back to disk
    pub fn save(&self) -> Result<()> {
        let manifest = self.manifest();
        let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
        std::fs::write(self.manifest_path(), json)
            .with_context(|| format!("Failed to write {}", self.manifest_path().display()))?;
        self.changed.store(false, AtomicOrdering::SeqCst);
        tracing::debug!("Saved manifest of {}", self.id);
        Ok(())
    }

    fn read_manifest(&self) -> Result<FolderManifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(FolderManifest::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn read_all(&self) -> Result<()> {
        let manifest = self.read_manifest()?;
        let file_count = count_files(&self.location)
            .with_context(|| format!("Failed to list {}", self.location.display()))?;

        let mut data = self.data.write();
        data.manifest = manifest;
        data.file_count = file_count;
        data.loaded_at = Some(Utc::now());
        Ok(())
    }
}

impl ContentObject for FolderItem {
    fn id(&self) -> &ContentId {
        &self.id
    }

    fn location(&self) -> &Path {
        &self.location
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn changed(&self) -> bool {
        self.changed.load(AtomicOrdering::SeqCst)
    }

    fn previous_id(&self) -> Option<ContentId> {
        self.previous_id.lock().clone()
    }

    fn set_previous_id(&self, id: ContentId) {
        *self.previous_id.lock() = Some(id);
    }

    fn load(&self) -> Result<()> {
        if !self.location.exists() {
            anyhow::bail!("{} does not exist", self.location.display());
        }
        self.read_all()
    }

    fn reload(&self) -> Result<()> {
        self.read_all()?;
        self.changed.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn outdate(&self) {
        self.outdated.store(true, AtomicOrdering::SeqCst);
    }

    fn is_outdated(&self) -> bool {
        self.outdated.load(AtomicOrdering::SeqCst)
    }

    fn handle_changed_file(&self, path: &Path) -> bool {
        if !same_location(path, &self.manifest_path()) {
            return false;
        }

        match self.read_manifest() {
            Ok(manifest) => {
                self.data.write().manifest = manifest;
                tracing::debug!("Picked up manifest change of {}", self.id);
                true
            }
            Err(e) => {
                tracing::debug!("Manifest of {} unreadable: {:#}", self.id, e);
                false
            }
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.name()
            .to_lowercase()
            .cmp(&other.name().to_lowercase())
            .then_with(|| self.id.cmp(&other.id))
    }
}

fn count_files(location: &Path) -> std::io::Result<usize> {
    if location.is_file() {
        return Ok(1);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(location)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

/// [`FileKind`] producing [`FolderItem`]s
#[derive(Debug, Clone, Default)]
pub struct FolderKind {
    /// Suffixes of sibling files that belong to an item, e.g. `.preview.png`
    pub attachment_suffixes: Vec<String>,
}

impl FolderKind {
    pub fn new(attachment_suffixes: Vec<String>) -> Self {
        Self {
            attachment_suffixes,
        }
    }
}

impl FileKind for FolderKind {
    type Item = FolderItem;

    fn create(&self, init: ObjectInit) -> Result<FolderItem> {
        Ok(FolderItem::new(init))
    }

    fn attached_files(&self, location: &Path) -> Vec<PathBuf> {
        let Some(name) = location.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };

        self.attachment_suffixes
            .iter()
            .map(|suffix| location.with_file_name(format!("{}{}", name, suffix)))
            .collect()
    }
}
