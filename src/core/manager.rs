//! Two-phase scan → load lifecycle over an abstract source of placeholders.
//!
//! ```text
//! Unscanned ──scan──▶ Scanning ──▶ Scanned ──load──▶ Loading ──▶ Loaded
//!                         ▲                                        │
//!                         └──────────────── scan ──────────────────┘
//! ```
//!
//! Scanning is cheap discovery; loading materializes items, either one at a
//! time on demand (`get_by_id`) or in bulk (`load`, `load_async`).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::collection::WrapperCollection;
use super::error::{CatalogError, LoadError, Result};
use super::progress::{LoadProgress, ProgressSink};
use super::wrapper::Wrapper;
use crate::domain::{ContentId, ContentObject, Placeholder};

/// Where items come from and how they are built.
///
/// `scan` must be cheap: it only discovers ids. `create` builds the concrete
/// item for one placeholder and may be called concurrently for different ids.
pub trait ContentSource: Send + Sync + 'static {
    type Item: ContentObject;

    /// Enumerate placeholders for every item currently present
    fn scan(&self) -> anyhow::Result<Vec<Placeholder>>;

    /// Construct (but do not load) the item for a placeholder
    fn create(&self, placeholder: &Placeholder) -> anyhow::Result<Self::Item>;
}

/// Lifecycle state of a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Unscanned,
    Scanning,
    Scanned,
    Loading,
    Loaded,
}

/// Tunables for bulk loading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Items materialized at once by `load_async` (default: 3)
    #[serde(default = "default_load_concurrency")]
    pub load_concurrency: usize,

    /// Upper bound on `load_async` passes (default: 64)
    #[serde(default = "default_max_load_passes")]
    pub max_load_passes: usize,

    /// Start loading in the background when someone observes the list
    #[serde(default = "default_eager_load")]
    pub eager_load_when_observed: bool,
}

fn default_load_concurrency() -> usize {
    3
}
fn default_max_load_passes() -> usize {
    64
}
fn default_eager_load() -> bool {
    true
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            load_concurrency: default_load_concurrency(),
            max_load_passes: default_max_load_passes(),
            eager_load_when_observed: default_eager_load(),
        }
    }
}

/// Counters recorded after scans and loads
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    /// Items loaded when the last bulk load finished
    pub loaded: usize,

    /// Duration of the last scan
    pub scan_duration: Option<Duration>,

    /// Duration of the last bulk load
    pub load_duration: Option<Duration>,

    /// When the last bulk load finished
    pub last_loaded_at: Option<DateTime<Utc>>,
}

struct ManagerInner<S: ContentSource> {
    source: S,
    settings: ManagerSettings,
    list: WrapperCollection<S::Item>,
    state: watch::Sender<ManagerState>,
    scan_lock: Mutex<()>,
    load_lock: Mutex<()>,
    loading_reset: AtomicBool,
    stats: Mutex<LoadStats>,
    last_error: Mutex<Option<String>>,
    progress: Mutex<Option<Arc<dyn ProgressSink>>>,
}

impl<S: ContentSource> ManagerInner<S> {
    fn create_and_load(&self, placeholder: &Placeholder) -> std::result::Result<S::Item, LoadError> {
        let id = &placeholder.id;

        let item = self
            .source
            .create(placeholder)
            .map_err(|e| LoadError::from_anyhow(id.clone(), &e))?;
        item.load().map_err(|e| LoadError::from_anyhow(id.clone(), &e))?;
        item.past_load();

        tracing::trace!("Created and loaded {}", id);
        Ok(item)
    }
}

/// Catalogue manager over a [`ContentSource`].
///
/// Cheap to clone; clones share the same catalogue.
pub struct BaseManager<S: ContentSource> {
    inner: Arc<ManagerInner<S>>,
}

impl<S: ContentSource> Clone for BaseManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ContentSource> BaseManager<S> {
    /// Create a manager with default settings
    pub fn new(source: S) -> Self {
        Self::with_settings(source, ManagerSettings::default())
    }

    /// Create a manager with custom settings
    pub fn with_settings(source: S, settings: ManagerSettings) -> Self {
        let (state, _) = watch::channel(ManagerState::Unscanned);
        Self {
            inner: Arc::new(ManagerInner {
                source,
                settings,
                list: WrapperCollection::new(),
                state,
                scan_lock: Mutex::new(()),
                load_lock: Mutex::new(()),
                loading_reset: AtomicBool::new(false),
                stats: Mutex::new(LoadStats::default()),
                last_error: Mutex::new(None),
                progress: Mutex::new(None),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Read access to the catalogue
    pub fn list(&self) -> &WrapperCollection<S::Item> {
        &self.inner.list
    }

    /// Install or clear the progress sink used by `load_async`
    pub fn set_progress_sink(&self, sink: Option<Arc<dyn ProgressSink>>) {
        *self.inner.progress.lock() = sink;
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ManagerState::Scanning
    }

    pub fn is_scanned(&self) -> bool {
        self.state() >= ManagerState::Scanned
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ManagerState::Loaded
    }

    pub fn stats(&self) -> LoadStats {
        self.inner.stats.lock().clone()
    }

    /// Last error recorded by a background or bulk async operation
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    fn set_state(&self, state: ManagerState) {
        self.inner.state.send_replace(state);
    }

    fn record_error(&self, error: &dyn std::fmt::Display) {
        tracing::warn!("{}", error);
        *self.inner.last_error.lock() = Some(error.to_string());
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Rediscover the catalogue.
    ///
    /// Fails with [`CatalogError::AlreadyScanning`] if another scan is
    /// running. On failure the list is cleared and the manager still counts
    /// as scanned, so callers do not spin on a broken source.
    pub fn scan(&self) -> Result<()> {
        let _guard = self
            .inner
            .scan_lock
            .try_lock()
            .ok_or(CatalogError::AlreadyScanning)?;
        self.scan_locked()
    }

    fn scan_locked(&self) -> Result<()> {
        self.set_state(ManagerState::Scanning);
        let started = Instant::now();

        for item in self.inner.list.loaded_items() {
            item.outdate();
        }

        match self.inner.source.scan() {
            Ok(placeholders) => {
                let wrappers = placeholders
                    .into_iter()
                    .map(|p| Arc::new(Wrapper::new(p)))
                    .collect();
                self.inner.list.replace_all(wrappers);
                self.inner.loading_reset.store(true, Ordering::SeqCst);

                let elapsed = started.elapsed();
                self.inner.stats.lock().scan_duration = Some(elapsed);
                self.set_state(ManagerState::Scanned);
                tracing::info!("Scanned {} items in {:?}", self.inner.list.len(), elapsed);

                self.kick_eager_load();
                Ok(())
            }
            Err(e) => {
                self.inner.list.replace_all(Vec::new());
                self.set_state(ManagerState::Scanned);
                tracing::error!("Scan failed: {:#}", e);
                Err(CatalogError::Scan {
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    /// Scan unless already scanned, waiting for a running scan to finish
    pub fn ensure_scanned(&self) -> Result<()> {
        if self.is_scanned() {
            return Ok(());
        }

        let _guard = self.inner.scan_lock.lock();
        if self.is_scanned() {
            return Ok(());
        }
        self.scan_locked()
    }

    pub async fn ensure_scanned_async(&self) -> Result<()> {
        if self.is_scanned() {
            return Ok(());
        }

        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.ensure_scanned())
            .await
            .map_err(|e| CatalogError::Scan {
                reason: format!("Scan task failed: {}", e),
            })?
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Scan if needed, then load everything synchronously
    pub fn ensure_loaded(&self) -> Result<()> {
        self.ensure_scanned()?;
        if !self.is_loaded() {
            self.load()?;
        }
        Ok(())
    }

    /// Scan if needed, then load everything with bounded concurrency
    pub async fn ensure_loaded_async(&self) -> Result<()> {
        self.ensure_scanned_async().await?;
        if !self.is_loaded() {
            self.load_async().await?;
        }
        Ok(())
    }

    /// Materialize every unloaded wrapper, one at a time.
    ///
    /// The first failing item aborts the pass and its error is returned.
    pub fn load(&self) -> Result<()> {
        let _guard = self.inner.load_lock.lock();
        self.inner.loading_reset.store(false, Ordering::SeqCst);
        self.set_state(ManagerState::Loading);
        let started = Instant::now();

        for wrapper in self.inner.list.unloaded() {
            if let Err(e) = self.ensure_wrapper_loaded(&wrapper) {
                self.set_state(ManagerState::Scanned);
                return Err(e);
            }
        }

        self.finish_load(started);
        Ok(())
    }

    /// Materialize every unloaded wrapper with bounded concurrency.
    ///
    /// Passes repeat until one materializes nothing new, so placeholders
    /// added while loading are picked up too. Per-item failures are recorded
    /// (see [`BaseManager::last_error`]) instead of aborting the pass.
    pub async fn load_async(&self) -> Result<()> {
        self.inner.loading_reset.store(false, Ordering::SeqCst);
        self.set_state(ManagerState::Loading);
        let started = Instant::now();

        let concurrency = self.inner.settings.load_concurrency.max(1);
        let max_passes = self.inner.settings.max_load_passes.max(1);
        let mut passes = 0;

        loop {
            let pending = self.inner.list.unloaded();
            if pending.is_empty() {
                break;
            }
            if passes >= max_passes {
                tracing::warn!(
                    "Stopping bulk load after {} passes with {} items still unloaded",
                    passes,
                    pending.len()
                );
                break;
            }
            passes += 1;

            let total = pending.len();
            let done = AtomicUsize::new(0);
            let progress = self.inner.progress.lock().clone();

            let loaded = stream::iter(pending)
                .map(|wrapper| {
                    let done = &done;
                    let progress = progress.clone();
                    async move {
                        let result = self.ensure_wrapper_loaded_async(&wrapper).await;
                        let done = done.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(sink) = &progress {
                            sink.report(LoadProgress { done, total });
                        }
                        result
                    }
                })
                .buffer_unordered(concurrency)
                .fold(0usize, |count, result| async move {
                    match result {
                        Ok(_) => count + 1,
                        Err(e) => {
                            self.record_error(&e);
                            count
                        }
                    }
                })
                .await;

            tracing::debug!("Load pass {} materialized {}/{} items", passes, loaded, total);
            if loaded == 0 {
                break;
            }
        }

        if self.inner.loading_reset.swap(false, Ordering::SeqCst) {
            tracing::debug!("List changed during bulk load, running a final pass");
            let manager = self.clone();
            match tokio::task::spawn_blocking(move || manager.load()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.record_error(&e),
                Err(e) => self.record_error(&format!("Final load pass failed: {}", e)),
            }
        }

        self.finish_load(started);
        Ok(())
    }

    fn finish_load(&self, started: Instant) {
        let elapsed = started.elapsed();
        let loaded = self.inner.list.loaded_count();
        {
            let mut stats = self.inner.stats.lock();
            stats.loaded = loaded;
            stats.load_duration = Some(elapsed);
            stats.last_loaded_at = Some(Utc::now());
        }
        self.set_state(ManagerState::Loaded);
        tracing::info!("Loaded {} items in {:?}", loaded, elapsed);
    }

    /// Construct an item and run its load hooks
    pub fn create_and_load(
        &self,
        placeholder: &Placeholder,
    ) -> std::result::Result<S::Item, LoadError> {
        self.inner.create_and_load(placeholder)
    }

    /// Materialize one wrapper synchronously
    pub fn ensure_wrapper_loaded(&self, wrapper: &Wrapper<S::Item>) -> Result<Arc<S::Item>> {
        let inner = &self.inner;
        Ok(wrapper.ensure_loaded(|p| inner.create_and_load(p))?)
    }

    /// Materialize one wrapper on the blocking pool
    pub async fn ensure_wrapper_loaded_async(
        &self,
        wrapper: &Arc<Wrapper<S::Item>>,
    ) -> Result<Arc<S::Item>> {
        let inner = Arc::downgrade(&self.inner);
        let item = wrapper
            .ensure_loaded_async(move |p| match inner.upgrade() {
                Some(inner) => inner.create_and_load(p),
                None => Err(LoadError::new(p.id.clone(), "Manager dropped")),
            })
            .await?;
        Ok(item)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Wrapper for an id without scanning or loading
    pub fn get_wrapper(&self, id: &ContentId) -> Option<Arc<Wrapper<S::Item>>> {
        self.inner.list.get(id)
    }

    /// Wrapper for an id, scanning first if needed
    pub fn get_wrapper_by_id(&self, id: &ContentId) -> Result<Option<Arc<Wrapper<S::Item>>>> {
        self.ensure_scanned()?;
        Ok(self.inner.list.get(id))
    }

    /// Loaded item for an id; `None` if the id is unknown
    pub fn get_by_id(&self, id: &ContentId) -> Result<Option<Arc<S::Item>>> {
        match self.get_wrapper_by_id(id)? {
            Some(wrapper) => self.ensure_wrapper_loaded(&wrapper).map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_by_id_async(&self, id: &ContentId) -> Result<Option<Arc<S::Item>>> {
        self.ensure_scanned_async().await?;
        match self.inner.list.get(id) {
            Some(wrapper) => self.ensure_wrapper_loaded_async(&wrapper).await.map(Some),
            None => Ok(None),
        }
    }

    /// Loaded items with unsaved edits
    pub fn changed_items(&self) -> Vec<Arc<S::Item>> {
        self.inner
            .list
            .loaded_items()
            .into_iter()
            .filter(|item| item.changed())
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutation primitives
    // ------------------------------------------------------------------

    /// Append a wrapper (replacing one with the same id)
    pub(crate) fn add_in_list(&self, wrapper: Arc<Wrapper<S::Item>>) {
        let unloaded = !wrapper.is_loaded();
        self.inner.list.add(Arc::clone(&wrapper));
        self.mark_loading_reset(unloaded);

        if unloaded {
            self.kick_eager_wrapper_load(wrapper);
        }
    }

    /// Remove the wrapper for an id
    pub(crate) fn remove_from_list(&self, id: &ContentId) -> Option<Arc<Wrapper<S::Item>>> {
        let removed = self.inner.list.remove(id);
        self.mark_loading_reset(false);
        removed
    }

    /// Swap the wrapper for `old_id`, keeping its position
    pub(crate) fn replace_in_list(&self, old_id: &ContentId, wrapper: Arc<Wrapper<S::Item>>) {
        let unloaded = !wrapper.is_loaded();
        self.inner.list.replace(old_id, Arc::clone(&wrapper));
        self.mark_loading_reset(unloaded);

        if unloaded {
            self.kick_eager_wrapper_load(wrapper);
        }
    }

    fn mark_loading_reset(&self, added_unloaded: bool) {
        self.inner.loading_reset.store(true, Ordering::SeqCst);

        // A fully loaded catalogue with a fresh placeholder is no longer loaded
        if added_unloaded && self.is_loaded() {
            self.set_state(ManagerState::Scanned);
        }
    }

    fn wants_eager_load(&self) -> bool {
        self.inner.settings.eager_load_when_observed
            && self.inner.list.has_listeners()
            && tokio::runtime::Handle::try_current().is_ok()
    }

    fn kick_eager_load(&self) {
        if !self.wants_eager_load() {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.load_async().await {
                tracing::warn!("Background load failed: {}", e);
            }
        });
    }

    fn kick_eager_wrapper_load(&self, wrapper: Arc<Wrapper<S::Item>>) {
        if !self.wants_eager_load() {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.ensure_wrapper_loaded_async(&wrapper).await {
                manager.record_error(&e);
            }
        });
    }
}
