//! Stable per-id handle mediating lazy materialization.
//!
//! A wrapper starts out holding a [`Placeholder`] and flips to the loaded
//! item exactly once. Concurrent callers never run the loader twice:
//! synchronous callers serialize on a per-wrapper lock, asynchronous callers
//! share one in-flight future which itself goes through that lock on the
//! blocking pool.

use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::error::LoadError;
use crate::domain::{ContentId, ContentObject, Placeholder};

/// Current value of a wrapper
pub enum WrapperValue<T> {
    Placeholder(Placeholder),
    Loaded(Arc<T>),
}

impl<T> Clone for WrapperValue<T> {
    fn clone(&self) -> Self {
        match self {
            WrapperValue::Placeholder(p) => WrapperValue::Placeholder(p.clone()),
            WrapperValue::Loaded(item) => WrapperValue::Loaded(Arc::clone(item)),
        }
    }
}

impl<T> std::fmt::Debug for WrapperValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WrapperValue::Placeholder(p) => f.debug_tuple("Placeholder").field(p).finish(),
            WrapperValue::Loaded(_) => f.write_str("Loaded(..)"),
        }
    }
}

/// Raised whenever a wrapper's value is replaced
pub struct ValueChanged<T> {
    pub id: ContentId,
    pub old: WrapperValue<T>,
    pub new: Arc<T>,
}

impl<T> Clone for ValueChanged<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            old: self.old.clone(),
            new: Arc::clone(&self.new),
        }
    }
}

type LoadTask<T> = Shared<BoxFuture<'static, Result<Arc<T>, LoadError>>>;

/// One catalogue slot
pub struct Wrapper<T: ContentObject> {
    id: ContentId,
    value: RwLock<WrapperValue<T>>,
    load_lock: Mutex<()>,
    loading: Mutex<Option<LoadTask<T>>>,
    changes: broadcast::Sender<ValueChanged<T>>,
}

impl<T: ContentObject> Wrapper<T> {
    /// Create an unloaded wrapper
    pub fn new(placeholder: Placeholder) -> Self {
        let (changes, _) = broadcast::channel(8);
        Self {
            id: placeholder.id.clone(),
            value: RwLock::new(WrapperValue::Placeholder(placeholder)),
            load_lock: Mutex::new(()),
            loading: Mutex::new(None),
            changes,
        }
    }

    /// Create a wrapper around an already loaded item
    pub fn loaded(item: Arc<T>) -> Self {
        let (changes, _) = broadcast::channel(8);
        Self {
            id: item.id().clone(),
            value: RwLock::new(WrapperValue::Loaded(item)),
            load_lock: Mutex::new(()),
            loading: Mutex::new(None),
            changes,
        }
    }

    pub fn id(&self) -> &ContentId {
        &self.id
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.value.read(), WrapperValue::Loaded(_))
    }

    /// Snapshot of the current value
    pub fn value(&self) -> WrapperValue<T> {
        self.value.read().clone()
    }

    /// The loaded item, if any
    pub fn loaded_item(&self) -> Option<Arc<T>> {
        match &*self.value.read() {
            WrapperValue::Loaded(item) => Some(Arc::clone(item)),
            WrapperValue::Placeholder(_) => None,
        }
    }

    pub fn enabled(&self) -> bool {
        match &*self.value.read() {
            WrapperValue::Loaded(item) => item.enabled(),
            WrapperValue::Placeholder(p) => p.enabled,
        }
    }

    /// Placeholder view of this slot, loaded or not
    pub fn placeholder(&self) -> Placeholder {
        match &*self.value.read() {
            WrapperValue::Loaded(item) => Placeholder::new(item.id().clone(), item.enabled()),
            WrapperValue::Placeholder(p) => p.clone(),
        }
    }

    /// Subscribe to value replacements
    pub fn subscribe(&self) -> broadcast::Receiver<ValueChanged<T>> {
        self.changes.subscribe()
    }

    /// Replace the value with a loaded item.
    ///
    /// A superseded loaded item is outdated. The value never goes back to a
    /// placeholder.
    pub(crate) fn set_loaded(&self, item: Arc<T>) {
        debug_assert_eq!(item.id(), &self.id);

        let old = {
            let mut value = self.value.write();
            std::mem::replace(&mut *value, WrapperValue::Loaded(Arc::clone(&item)))
        };

        if let WrapperValue::Loaded(previous) = &old {
            if !Arc::ptr_eq(previous, &item) {
                previous.outdate();
            }
        }

        // No receivers is fine
        let _ = self.changes.send(ValueChanged {
            id: self.id.clone(),
            old,
            new: item,
        });
    }

    /// Load synchronously, running `load` at most once for this wrapper
    pub fn ensure_loaded<F>(&self, load: F) -> Result<Arc<T>, LoadError>
    where
        F: FnOnce(&Placeholder) -> Result<T, LoadError>,
    {
        if let Some(item) = self.loaded_item() {
            return Ok(item);
        }

        let _guard = self.load_lock.lock();

        // Someone else may have finished while we waited
        let placeholder = match &*self.value.read() {
            WrapperValue::Loaded(item) => return Ok(Arc::clone(item)),
            WrapperValue::Placeholder(p) => p.clone(),
        };

        let item = Arc::new(load(&placeholder)?);
        self.set_loaded(Arc::clone(&item));
        tracing::trace!("Materialized {}", self.id);
        Ok(item)
    }

    /// Load asynchronously; concurrent callers await one shared load.
    ///
    /// The loader runs on the blocking pool under the same lock as
    /// [`Wrapper::ensure_loaded`], so sync and async callers never race.
    pub async fn ensure_loaded_async<F>(self: &Arc<Self>, load: F) -> Result<Arc<T>, LoadError>
    where
        F: FnOnce(&Placeholder) -> Result<T, LoadError> + Send + 'static,
    {
        if let Some(item) = self.loaded_item() {
            return Ok(item);
        }

        let task = {
            let mut slot = self.loading.lock();
            match slot.as_ref() {
                Some(task) => task.clone(),
                None => {
                    let task = Self::spawn_load(Arc::downgrade(self), self.id.clone(), load);
                    *slot = Some(task.clone());
                    task
                }
            }
        };

        task.await
    }

    fn spawn_load<F>(weak: Weak<Self>, id: ContentId, load: F) -> LoadTask<T>
    where
        F: FnOnce(&Placeholder) -> Result<T, LoadError> + Send + 'static,
    {
        async move {
            let Some(wrapper) = weak.upgrade() else {
                return Err(LoadError::new(id, "Wrapper dropped before loading"));
            };

            let joined = tokio::task::spawn_blocking(move || wrapper.ensure_loaded(load)).await;

            if let Some(wrapper) = weak.upgrade() {
                wrapper.loading.lock().take();
            }

            match joined {
                Ok(result) => result,
                Err(e) => Err(LoadError::new(id, format!("Load task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    /// Stable order: loaded items by natural order, loaded after unloaded,
    /// unloaded among themselves by id
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.loaded_item(), other.loaded_item()) {
            (Some(a), Some(b)) => a.as_ref().compare(b.as_ref()),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.id.cmp(&other.id),
        }
    }
}

impl<T: ContentObject> std::fmt::Debug for Wrapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .finish()
    }
}
