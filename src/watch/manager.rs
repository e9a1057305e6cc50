//! File-backed catalogue kept in sync with the disk.
//!
//! Raw events go through three steps:
//!
//! 1. Map the path to its object-level location and decide whether the
//!    change is at the object itself or inside it.
//! 2. Drop it if the shield is raised, the path matches an ignore pattern,
//!    or it is outside the catalogue.
//! 3. Hand it to the [`WatchingTask`] for that location, which coalesces a
//!    burst into one change and calls [`WatchedManager::apply_change`].

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::core::{Result, Wrapper};
use crate::domain::{
    location_key, same_location, ChangeKind, CoalescedChange, ContentId, ContentObject,
    Placeholder, RawFsEvent,
};
use crate::library::{FileKind, FileManager};

use super::listener::{DirectoryListener, DirectoryWatcher};
use super::task::{ChangeHandler, WatchingTask};

/// Watch tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Quiet period before a burst of events is applied
    #[serde(default = "default_debounce", with = "millis")]
    pub debounce: Duration,

    /// Glob patterns for paths whose events are dropped
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_debounce() -> Duration {
    Duration::from_millis(300)
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            ignore_patterns: Vec::new(),
        }
    }
}

/// Serialize durations as whole milliseconds
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

struct WatchedInner<K: FileKind> {
    files: FileManager<K>,
    settings: WatchSettings,
    ignore: Vec<glob::Pattern>,
    tasks: Mutex<HashMap<String, Arc<WatchingTask>>>,
    watcher: Mutex<Option<DirectoryWatcher>>,
    applied: AtomicUsize,
    me: Weak<WatchedInner<K>>,
}

/// [`FileManager`] that reconciles itself with filesystem events
pub struct WatchedManager<K: FileKind> {
    inner: Arc<WatchedInner<K>>,
}

impl<K: FileKind> Clone for WatchedManager<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: FileKind> Deref for WatchedManager<K> {
    type Target = FileManager<K>;

    fn deref(&self) -> &FileManager<K> {
        &self.inner.files
    }
}

impl<K: FileKind> WatchedManager<K> {
    pub fn new(files: FileManager<K>, settings: WatchSettings) -> Self {
        let ignore = settings
            .ignore_patterns
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Ignoring invalid watch pattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect();

        let inner = Arc::new_cyclic(|me| WatchedInner {
            files,
            settings,
            ignore,
            tasks: Mutex::new(HashMap::new()),
            watcher: Mutex::new(None),
            applied: AtomicUsize::new(0),
            me: me.clone(),
        });

        Self { inner }
    }

    pub fn files(&self) -> &FileManager<K> {
        &self.inner.files
    }

    pub fn watch_settings(&self) -> &WatchSettings {
        &self.inner.settings
    }

    /// Start receiving OS events for the catalogue roots
    pub fn start_watching(&self) -> Result<()> {
        let mut watcher = self.inner.watcher.lock();
        if watcher.is_some() {
            return Ok(());
        }

        let listener: Weak<dyn DirectoryListener> = self.inner.me.clone();
        let roots = self.inner.files.directories().roots();
        *watcher = Some(DirectoryWatcher::start(roots, listener)?);
        Ok(())
    }

    pub async fn stop_watching(&self) {
        let watcher = self.inner.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watcher.lock().is_some()
    }

    /// Feed a raw event as if it came from the OS watcher
    pub fn handle_raw_event(&self, event: RawFsEvent) {
        self.inner.on_raw_event(event);
    }

    /// Apply one coalesced change to the catalogue
    pub async fn apply_change(&self, location: &Path, change: CoalescedChange) {
        self.inner.apply_change(location, change).await;
    }

    /// Number of coalesced changes applied so far
    pub fn applied_changes(&self) -> usize {
        self.inner.applied.load(Ordering::SeqCst)
    }

    /// Number of locations with a debouncer
    pub fn watching_task_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }
}

impl<K: FileKind> DirectoryListener for WatchedInner<K> {
    fn on_raw_event(&self, event: RawFsEvent) {
        if self.files.shield().is_ignoring() {
            trace!("Shielded: {} {}", event.kind, event.path.display());
            return;
        }
        if self.is_ignored(&event.path) {
            return;
        }

        let directories = self.files.directories();
        let object = |path: &Path| {
            directories
                .location_by_filename(path)
                .filter(|(location, _)| directories.is_entry(location))
        };
        let target = event.new_path.as_deref().and_then(object);

        let Some((location, inner)) = object(&event.path) else {
            trace!("Not an item: {} {}", event.kind, event.path.display());
            // Moved in from outside the catalogue
            if event.kind == ChangeKind::Renamed {
                if let (Some((new_location, new_inner)), Some(new_path)) = (target, event.new_path) {
                    if new_inner {
                        self.route(new_location, ChangeKind::Changed, None, Some(new_path));
                    } else {
                        self.route(new_location, ChangeKind::Created, None, None);
                    }
                }
            }
            return;
        };

        match (event.kind, inner) {
            (ChangeKind::Renamed, false) => match target {
                Some((new_location, false)) => {
                    self.route(location, ChangeKind::Renamed, Some(new_location), None)
                }
                Some((new_location, true)) => {
                    self.route(location, ChangeKind::Deleted, None, None);
                    self.route(new_location, ChangeKind::Changed, None, event.new_path);
                }
                None => self.route(location, ChangeKind::Deleted, None, None),
            },
            (ChangeKind::Renamed, true) => {
                self.route(location.clone(), ChangeKind::Changed, None, Some(event.path));
                if let Some((new_location, _)) = target {
                    if !same_location(&new_location, &location) {
                        self.route(new_location, ChangeKind::Changed, None, event.new_path);
                    }
                }
            }
            (_, true) => self.route(location, ChangeKind::Changed, None, Some(event.path)),
            (kind, false) => self.route(location, kind, None, None),
        }
    }
}

impl<K: FileKind> WatchedInner<K> {
    fn is_ignored(&self, path: &Path) -> bool {
        let name = path.file_name().map(Path::new);
        self.ignore
            .iter()
            .any(|p| p.matches_path(path) || name.map_or(false, |n| p.matches_path(n)))
    }

    fn route(
        &self,
        location: PathBuf,
        kind: ChangeKind,
        new_location: Option<PathBuf>,
        full_filename: Option<PathBuf>,
    ) {
        let task = {
            let mut tasks = self.tasks.lock();
            let key = location_key(&location);
            Arc::clone(tasks.entry(key).or_insert_with(|| {
                Arc::new(WatchingTask::new(
                    location.clone(),
                    self.settings.debounce,
                    self.change_handler(),
                ))
            }))
        };
        task.add_event(kind, new_location, full_filename);
    }

    fn change_handler(&self) -> ChangeHandler {
        let me = self.me.clone();
        Arc::new(move |location: PathBuf, change: CoalescedChange| {
            let me = me.clone();
            async move {
                if let Some(inner) = me.upgrade() {
                    inner.apply_change(&location, change).await;
                }
            }
            .boxed()
        })
    }

    async fn apply_change(&self, location: &Path, change: CoalescedChange) {
        self.applied.fetch_add(1, Ordering::SeqCst);

        let files = &self.files;
        let Some(id) = files.directories().get_id(location) else {
            debug!("No id for {}, dropping {} event", location.display(), change.kind);
            return;
        };

        let mut current = files.get_wrapper(&id);
        let mut drifted = false;
        if let Some(wrapper) = &current {
            match files.wrapper_location(wrapper) {
                Ok(actual) if same_location(&actual, location) => {}
                Ok(actual) => {
                    debug!(
                        "{} now lives at {}, event for {} is stale",
                        id,
                        actual.display(),
                        location.display()
                    );
                    if change.kind == ChangeKind::Created {
                        files.remove_from_list(&id);
                    } else {
                        drifted = true;
                    }
                    current = None;
                }
                Err(e) => {
                    warn!("Failed to locate {}: {}", id, e);
                    return;
                }
            }
        }

        let exists = location.exists();
        match change.kind {
            ChangeKind::Changed => match current {
                Some(wrapper) => self.refresh(&wrapper, change.full_filename.as_deref()).await,
                None if exists && !drifted => self.add_placeholder(id, location),
                None => {}
            },
            ChangeKind::Created => match current {
                Some(wrapper) => self.refresh(&wrapper, None).await,
                None if exists => self.add_placeholder(id, location),
                None => {}
            },
            ChangeKind::Deleted => {
                if !exists {
                    if current.is_some() {
                        files.remove_from_list(&id);
                        debug!("Removed {}", id);
                    }
                } else if let Some(wrapper) = current {
                    self.refresh(&wrapper, None).await;
                } else if !drifted {
                    self.add_placeholder(id, location);
                }
            }
            ChangeKind::Renamed => match change.new_location {
                Some(new_location) if same_location(&new_location, location) => {
                    if let Some(wrapper) = current {
                        self.refresh(&wrapper, None).await;
                    }
                }
                Some(new_location) => {
                    if current.is_some() {
                        files.remove_from_list(&id);
                    }
                    if new_location.exists() {
                        match files.directories().get_id(&new_location) {
                            Some(new_id) => self.add_placeholder(new_id, &new_location),
                            None => debug!("No id for {}", new_location.display()),
                        }
                    }
                }
                None => self.reconcile_all(id, location, current, exists, drifted).await,
            },
            ChangeKind::All => self.reconcile_all(id, location, current, exists, drifted).await,
        }
    }

    async fn reconcile_all(
        &self,
        id: ContentId,
        location: &Path,
        current: Option<Arc<Wrapper<K::Item>>>,
        exists: bool,
        drifted: bool,
    ) {
        match (current, exists) {
            (Some(wrapper), true) => self.refresh(&wrapper, None).await,
            (Some(_), false) => {
                self.files.remove_from_list(&id);
            }
            (None, true) if !drifted => self.add_placeholder(id, location),
            (None, _) => {}
        }
    }

    /// Let a loaded item absorb a single-file change, or reload it
    async fn refresh(&self, wrapper: &Wrapper<K::Item>, full_filename: Option<&Path>) {
        let Some(item) = wrapper.loaded_item() else {
            return;
        };
        if full_filename.map_or(false, |f| item.handle_changed_file(f)) {
            return;
        }

        let id = item.id().clone();
        match tokio::task::spawn_blocking(move || item.reload()).await {
            Ok(Ok(())) => debug!("Reloaded {}", id),
            Ok(Err(e)) => warn!("Failed to reload {}: {:#}", id, e),
            Err(e) => warn!("Reload task for {} failed: {}", id, e),
        }
    }

    fn add_placeholder(&self, id: ContentId, location: &Path) {
        let files = &self.files;
        if !files.directories().is_entry(location) {
            trace!("{} is not an item, not adding", location.display());
            return;
        }

        if let Some(existing) = files.get_wrapper(&id) {
            match files.wrapper_location(&existing) {
                Ok(actual) if same_location(&actual, location) => return,
                Ok(actual) if actual.exists() => {
                    warn!(
                        "{} exists at both {} and {}, keeping the first",
                        id,
                        actual.display(),
                        location.display()
                    );
                    return;
                }
                _ => {}
            }
        }

        let enabled = files.directories().check_if_enabled(location);
        debug!("Added {}", id);
        files.add_in_list(Arc::new(Wrapper::new(Placeholder { id, enabled })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{ContentDirectories, FolderKind, RecycleBin};
    use crate::watch::ChangeShield;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> WatchedManager<FolderKind> {
        let directories = ContentDirectories::new(
            temp.path().join("enabled"),
            Some(temp.path().join("disabled")),
        );
        directories.ensure_roots().unwrap();

        let files = FileManager::with_settings(
            FolderKind::default(),
            Arc::new(directories),
            Arc::new(RecycleBin::new(temp.path().join("recycle"))),
            Default::default(),
            ChangeShield::new(Duration::from_millis(500)),
        );
        WatchedManager::new(
            files,
            WatchSettings {
                debounce: Duration::from_millis(50),
                ignore_patterns: vec!["*.tmp".to_string()],
            },
        )
    }

    fn ids(manager: &WatchedManager<FolderKind>) -> Vec<String> {
        manager.list().ids().iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_created_directory_is_added() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        manager.ensure_scanned_async().await.unwrap();

        let location = temp.path().join("enabled/aaa");
        std::fs::create_dir(&location).unwrap();
        manager
            .apply_change(&location, CoalescedChange {
                kind: ChangeKind::Created,
                new_location: None,
                full_filename: None,
            })
            .await;

        assert_eq!(ids(&manager), vec!["aaa"]);
        assert!(!manager.get_wrapper(&ContentId::new("aaa")).unwrap().is_loaded());
    }

    #[tokio::test]
    async fn test_spurious_delete_keeps_item() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("enabled/aaa")).unwrap();
        let manager = manager(&temp);
        manager.ensure_scanned_async().await.unwrap();

        let location = temp.path().join("enabled/aaa");
        manager
            .apply_change(&location, CoalescedChange {
                kind: ChangeKind::Deleted,
                new_location: None,
                full_filename: None,
            })
            .await;
        assert_eq!(ids(&manager), vec!["aaa"]);

        std::fs::remove_dir(&location).unwrap();
        manager
            .apply_change(&location, CoalescedChange {
                kind: ChangeKind::Deleted,
                new_location: None,
                full_filename: None,
            })
            .await;
        assert!(ids(&manager).is_empty());
    }

    #[tokio::test]
    async fn test_stale_created_event_drops_wrapper() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("enabled/aaa")).unwrap();
        std::fs::create_dir_all(temp.path().join("disabled")).unwrap();
        let manager = manager(&temp);
        manager.ensure_scanned_async().await.unwrap();

        // Moved to the disabled root behind our back
        std::fs::rename(temp.path().join("enabled/aaa"), temp.path().join("disabled/aaa")).unwrap();
        let location = temp.path().join("disabled/aaa");
        manager
            .apply_change(&location, CoalescedChange {
                kind: ChangeKind::Created,
                new_location: None,
                full_filename: None,
            })
            .await;

        let wrapper = manager.get_wrapper(&ContentId::new("aaa")).unwrap();
        assert!(!wrapper.enabled());
        assert_eq!(manager.list().len(), 1);
    }

    #[tokio::test]
    async fn test_inner_event_routes_to_object() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("enabled/aaa")).unwrap();
        let manager = manager(&temp);
        manager.ensure_scanned_async().await.unwrap();

        manager.handle_raw_event(RawFsEvent::new(
            ChangeKind::Changed,
            temp.path().join("enabled/aaa/data/file.ini"),
        ));
        manager.handle_raw_event(RawFsEvent::new(
            ChangeKind::Created,
            temp.path().join("enabled/aaa/scratch.tmp"),
        ));
        manager.handle_raw_event(RawFsEvent::new(
            ChangeKind::Created,
            temp.path().join("elsewhere/bbb"),
        ));

        assert_eq!(manager.watching_task_count(), 1);
    }
}
