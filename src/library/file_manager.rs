//! Catalogue of items backed by entries in content directories.
//!
//! Adds structural operations on top of [`BaseManager`]: rename, toggle
//! between enabled and disabled roots, clone, delete into the recycle bin,
//! and making room for new content. Every operation that touches disk holds
//! the [`ChangeShield`] so the watcher does not reconcile our own writes.

use std::marker::PhantomData;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{BaseManager, CatalogError, ContentSource, ManagerSettings, Result, Wrapper};
use crate::domain::{same_location, ContentId, ContentObject, Placeholder};
use crate::watch::ChangeShield;

use super::directories::Directories;
use super::fs_ops;
use super::recycle::Recycler;

const MAX_ID_LENGTH: usize = 255;
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Everything a kind needs to construct an item
#[derive(Debug, Clone)]
pub struct ObjectInit {
    pub id: ContentId,
    pub enabled: bool,
    pub location: PathBuf,
}

/// Describes one type of file-backed content
pub trait FileKind: Send + Sync + 'static {
    type Item: ContentObject;

    /// Construct (but do not load) an item
    fn create(&self, init: ObjectInit) -> anyhow::Result<Self::Item>;

    /// Reject ids that cannot be used as entry names
    fn validate_id(&self, id: &str) -> std::result::Result<(), String> {
        default_validate_id(id)
    }

    /// Files that travel with the item on rename, clone and delete
    fn attached_files(&self, _location: &Path) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Id rules shared by every kind unless overridden
pub fn default_validate_id(id: &str) -> std::result::Result<(), String> {
    if id.trim().is_empty() {
        return Err("id is empty".to_string());
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(format!("id is longer than {} characters", MAX_ID_LENGTH));
    }
    if id == "." || id == ".." {
        return Err("id cannot be a relative path".to_string());
    }
    if let Some(c) = id.chars().find(|c| RESERVED_CHARS.contains(c) || c.is_control()) {
        return Err(format!("id contains reserved character {:?}", c));
    }
    if id.ends_with('.') || id.ends_with(' ') {
        return Err("id cannot end with a dot or a space".to_string());
    }
    Ok(())
}

/// A [`FileKind`] built from a closure
pub struct FnKind<T, F> {
    factory: F,
    _item: PhantomData<fn() -> T>,
}

/// Wrap a constructor closure as a [`FileKind`]
pub fn kind_from_fn<T, F>(factory: F) -> FnKind<T, F>
where
    T: ContentObject,
    F: Fn(ObjectInit) -> anyhow::Result<T> + Send + Sync + 'static,
{
    FnKind {
        factory,
        _item: PhantomData,
    }
}

impl<T, F> FileKind for FnKind<T, F>
where
    T: ContentObject,
    F: Fn(ObjectInit) -> anyhow::Result<T> + Send + Sync + 'static,
{
    type Item = T;

    fn create(&self, init: ObjectInit) -> anyhow::Result<T> {
        (self.factory)(init)
    }
}

/// Receives items with unsaved edits
pub trait UnsavedHandler<T> {
    fn on_unsaved(&self, item: &Arc<T>);
}

impl<T, F> UnsavedHandler<T> for F
where
    F: Fn(&Arc<T>),
{
    fn on_unsaved(&self, item: &Arc<T>) {
        self(item)
    }
}

/// [`ContentSource`] over content directories
pub struct FileSource<K: FileKind> {
    kind: K,
    directories: Arc<dyn Directories>,
    recycler: Arc<dyn Recycler>,
}

impl<K: FileKind> FileSource<K> {
    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn directories(&self) -> &Arc<dyn Directories> {
        &self.directories
    }

    pub fn recycler(&self) -> &Arc<dyn Recycler> {
        &self.recycler
    }
}

impl<K: FileKind> ContentSource for FileSource<K> {
    type Item = K::Item;

    fn scan(&self) -> anyhow::Result<Vec<Placeholder>> {
        use anyhow::Context;

        let entries = self
            .directories
            .content_entries()
            .context("Failed to list content directories")?;

        let mut placeholders = Vec::with_capacity(entries.len());
        for location in entries {
            match self.directories.get_id(&location) {
                Some(id) => placeholders.push(Placeholder {
                    id,
                    enabled: self.directories.check_if_enabled(&location),
                }),
                None => tracing::warn!("Skipping unrecognized entry {}", location.display()),
            }
        }
        Ok(placeholders)
    }

    fn create(&self, placeholder: &Placeholder) -> anyhow::Result<K::Item> {
        let location = self
            .directories
            .get_location(&placeholder.id, placeholder.enabled)?;
        self.kind.create(ObjectInit {
            id: placeholder.id.clone(),
            enabled: placeholder.enabled,
            location,
        })
    }
}

/// Manager for file-backed content
pub struct FileManager<K: FileKind> {
    base: BaseManager<FileSource<K>>,
    shield: ChangeShield,
}

impl<K: FileKind> Clone for FileManager<K> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            shield: self.shield.clone(),
        }
    }
}

impl<K: FileKind> Deref for FileManager<K> {
    type Target = BaseManager<FileSource<K>>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<K: FileKind> FileManager<K> {
    pub fn new(kind: K, directories: Arc<dyn Directories>, recycler: Arc<dyn Recycler>) -> Self {
        Self::with_settings(
            kind,
            directories,
            recycler,
            ManagerSettings::default(),
            ChangeShield::default(),
        )
    }

    pub fn with_settings(
        kind: K,
        directories: Arc<dyn Directories>,
        recycler: Arc<dyn Recycler>,
        settings: ManagerSettings,
        shield: ChangeShield,
    ) -> Self {
        let source = FileSource {
            kind,
            directories,
            recycler,
        };
        Self {
            base: BaseManager::with_settings(source, settings),
            shield,
        }
    }

    pub fn base(&self) -> &BaseManager<FileSource<K>> {
        &self.base
    }

    pub fn kind(&self) -> &K {
        &self.base.source().kind
    }

    pub fn directories(&self) -> &Arc<dyn Directories> {
        &self.base.source().directories
    }

    /// Shield raised around every disk operation
    pub fn shield(&self) -> &ChangeShield {
        &self.shield
    }

    /// Where the item behind a wrapper lives, without loading it
    pub fn wrapper_location(&self, wrapper: &Wrapper<K::Item>) -> Result<PathBuf> {
        match wrapper.loaded_item() {
            Some(item) => Ok(item.location().to_path_buf()),
            None => self
                .directories()
                .get_location(wrapper.id(), wrapper.enabled()),
        }
    }

    /// Primary location plus attachments, paired with their new places
    fn plan(&self, from: &Path, to: &Path) -> Vec<(PathBuf, PathBuf)> {
        let kind = self.kind();
        let mut pairs = vec![(from.to_path_buf(), to.to_path_buf())];
        pairs.extend(
            kind.attached_files(from)
                .into_iter()
                .zip(kind.attached_files(to)),
        );
        pairs
    }

    fn parse_new_id(&self, id: &str) -> Result<ContentId> {
        self.kind()
            .validate_id(id)
            .map_err(|reason| CatalogError::InvalidId {
                id: id.to_string(),
                reason,
            })?;
        Ok(ContentId::new(id))
    }

    async fn existing_wrapper(&self, id: &ContentId) -> Result<Arc<Wrapper<K::Item>>> {
        self.ensure_scanned_async().await?;
        self.get_wrapper(id)
            .ok_or_else(|| CatalogError::NotFound(id.clone()))
    }

    /// Build the item at its new place. If it cannot be loaded, a
    /// placeholder stands in so the list still matches the disk.
    async fn materialize(
        &self,
        placeholder: Placeholder,
        previous_id: Option<ContentId>,
    ) -> (Arc<Wrapper<K::Item>>, Result<()>) {
        let manager = self.base.clone();
        let candidate = placeholder.clone();
        let built = tokio::task::spawn_blocking(move || manager.create_and_load(&candidate)).await;

        match built {
            Ok(Ok(item)) => {
                if let Some(previous_id) = previous_id {
                    item.set_previous_id(previous_id);
                }
                (Arc::new(Wrapper::loaded(Arc::new(item))), Ok(()))
            }
            Ok(Err(e)) => (Arc::new(Wrapper::new(placeholder)), Err(e.into())),
            Err(e) => (
                Arc::new(Wrapper::new(placeholder)),
                Err(CatalogError::Cancelled {
                    reason: format!("Load task failed: {}", e),
                }),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Structural operations
    // ------------------------------------------------------------------

    /// Move an item between the enabled and disabled roots
    pub async fn toggle_async(&self, id: &ContentId) -> Result<()> {
        let wrapper = self.existing_wrapper(id).await?;
        let target = wrapper.id().as_str().to_string();
        self.rename_async(id, &target, !wrapper.enabled()).await
    }

    /// Rename and/or move an item between roots.
    ///
    /// Attached files follow the primary entry. If any move fails, moves
    /// already made are undone and the catalogue is left untouched.
    pub async fn rename_async(&self, old_id: &ContentId, new_id: &str, new_enabled: bool) -> Result<()> {
        if !new_enabled && !self.directories().supports_disabling() {
            return Err(CatalogError::DisablingNotSupported);
        }

        let new_id = self.parse_new_id(new_id)?;
        let wrapper = self.existing_wrapper(old_id).await?;

        let same_id = &new_id == old_id;
        if !same_id && self.get_wrapper(&new_id).is_some() {
            return Err(CatalogError::Conflict(new_id));
        }

        let old_location = self.wrapper_location(&wrapper)?;
        let new_location = self.directories().get_location(&new_id, new_enabled)?;
        if old_location == new_location {
            return Ok(());
        }
        if new_location.exists() && !same_location(&old_location, &new_location) {
            return Err(CatalogError::PlaceTaken(new_location));
        }

        let _shield = self.shield.ignore();
        let pairs = self.plan(&old_location, &new_location);
        run_blocking(move || fs_ops::move_all(&pairs)).await?;

        tracing::info!(
            "Renamed {} to {} ({})",
            old_id,
            new_id,
            if new_enabled { "enabled" } else { "disabled" }
        );

        let placeholder = Placeholder {
            id: new_id,
            enabled: new_enabled,
        };
        let (replacement, loaded) = self.materialize(placeholder, Some(old_id.clone())).await;
        self.replace_in_list(old_id, replacement);
        loaded
    }

    /// Copy an item under a new id
    pub async fn clone_async(&self, old_id: &ContentId, new_id: &str, new_enabled: bool) -> Result<()> {
        if !new_enabled && !self.directories().supports_disabling() {
            return Err(CatalogError::DisablingNotSupported);
        }

        let new_id = self.parse_new_id(new_id)?;
        let wrapper = self.existing_wrapper(old_id).await?;
        if self.get_wrapper(&new_id).is_some() {
            return Err(CatalogError::Conflict(new_id));
        }

        let old_location = self.wrapper_location(&wrapper)?;
        let new_location = self.directories().get_location(&new_id, new_enabled)?;
        if new_location.exists() {
            return Err(CatalogError::PlaceTaken(new_location));
        }

        let _shield = self.shield.ignore();
        let pairs = self.plan(&old_location, &new_location);
        run_blocking(move || fs_ops::copy_all(&pairs)).await?;

        tracing::info!("Cloned {} as {}", old_id, new_id);

        let placeholder = Placeholder {
            id: new_id,
            enabled: new_enabled,
        };
        let (copy, loaded) = self.materialize(placeholder, None).await;
        self.add_in_list(copy);
        loaded
    }

    /// Move an item (and its attachments) into the recycle bin.
    ///
    /// The item leaves the catalogue only once its location is gone.
    pub async fn delete_async(&self, id: &ContentId) -> Result<()> {
        let wrapper = self.existing_wrapper(id).await?;
        let location = self.wrapper_location(&wrapper)?;

        let mut paths = vec![location.clone()];
        paths.extend(self.kind().attached_files(&location));

        let _shield = self.shield.ignore();
        let recycler = Arc::clone(&self.base.source().recycler);
        let context = format!("Failed to recycle {}", location.display());
        run_blocking(move || {
            recycler
                .recycle(&paths)
                .map_err(|e| CatalogError::io(context, e))
        })
        .await?;

        if location.exists() {
            return Err(CatalogError::StillPresent(location));
        }

        self.remove_from_list(id);
        tracing::info!("Deleted {}", id);
        Ok(())
    }

    /// Delete several items under a single shield. Stops at the first failure.
    pub async fn delete_many_async(&self, ids: &[ContentId]) -> Result<usize> {
        let _shield = self.shield.ignore();
        let mut deleted = 0;
        for id in ids {
            self.delete_async(id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Make room for new content with this id and return where to put it.
    ///
    /// With `remove_existing`, whatever occupies the id is recycled first;
    /// otherwise an occupied slot is an error.
    pub async fn prepare_for_additional_content_async(
        &self,
        id: &str,
        remove_existing: bool,
    ) -> Result<PathBuf> {
        let id = self.parse_new_id(id)?;
        self.ensure_scanned_async().await?;

        let location = self.directories().get_location(&id, true)?;
        let existing = self.get_wrapper(&id);
        if existing.is_none() && !location.exists() {
            return Ok(location);
        }
        if !remove_existing {
            return Err(CatalogError::PlaceTaken(location));
        }

        let mut paths = vec![location.clone()];
        paths.extend(self.kind().attached_files(&location));
        if let Some(wrapper) = &existing {
            let current = self.wrapper_location(wrapper)?;
            if !same_location(&current, &location) {
                paths.extend(self.kind().attached_files(&current));
                paths.push(current);
            }
        }

        let _shield = self.shield.ignore();
        let recycler = Arc::clone(&self.base.source().recycler);
        let check = paths.clone();
        let recycled = run_blocking(move || {
            recycler
                .recycle(&paths)
                .map_err(|e| CatalogError::io("Failed to recycle existing content", e))
        })
        .await;

        if let Err(e) = recycled {
            return Err(CatalogError::Cancelled {
                reason: format!("Can't remove existing content: {}", e),
            });
        }
        if let Some(left) = check.iter().find(|p| p.exists()) {
            return Err(CatalogError::Cancelled {
                reason: format!("Can't remove existing content at {}", left.display()),
            });
        }

        self.remove_from_list(&id);
        tracing::info!("Cleared {} for new content", id);
        Ok(location)
    }

    /// Hand every item with unsaved edits to `handler`. Returns how many.
    pub fn notify_unsaved(&self, handler: &dyn UnsavedHandler<K::Item>) -> usize {
        let changed = self.changed_items();
        for item in &changed {
            handler.on_unsaved(item);
        }
        changed.len()
    }
}

/// Run blocking file work off the async runtime
async fn run_blocking<R, F>(work: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CatalogError::io("File task failed", std::io::Error::other(e)))?
}
