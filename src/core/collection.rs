//! Observable, id-indexed list of wrappers.
//!
//! Only managers mutate a collection; everyone else reads snapshots and
//! subscribes to [`CollectionEvent`]s. Every live [`Subscription`] counts as
//! a listener, which managers use to decide whether to load eagerly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::wrapper::Wrapper;
use crate::domain::{ContentId, ContentObject};

/// Change notification for a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    /// The whole list was replaced (scan)
    Reset { count: usize },

    /// A wrapper was appended
    Added { id: ContentId },

    /// A wrapper was removed
    Removed { id: ContentId },

    /// A wrapper was swapped in place
    Replaced { old_id: ContentId, new_id: ContentId },
}

struct CollectionState<T: ContentObject> {
    items: Vec<Arc<Wrapper<T>>>,
    by_id: HashMap<ContentId, Arc<Wrapper<T>>>,
}

impl<T: ContentObject> CollectionState<T> {
    fn position(&self, id: &ContentId) -> Option<usize> {
        self.items.iter().position(|w| w.id() == id)
    }
}

/// Releases a listener slot when dropped
struct ListenerGuard(Arc<AtomicUsize>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A live subscription to collection events
pub struct Subscription {
    receiver: broadcast::Receiver<CollectionEvent>,
    _listener: ListenerGuard,
}

impl Subscription {
    /// Wait for the next event
    pub async fn recv(&mut self) -> Result<CollectionEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take the next event without waiting
    pub fn try_recv(&mut self) -> Result<CollectionEvent, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Ordered set of wrappers with at most one wrapper per id
pub struct WrapperCollection<T: ContentObject> {
    state: RwLock<CollectionState<T>>,
    events: broadcast::Sender<CollectionEvent>,
    listeners: Arc<AtomicUsize>,
}

impl<T: ContentObject> Default for WrapperCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ContentObject> WrapperCollection<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(CollectionState {
                items: Vec::new(),
                by_id: HashMap::new(),
            }),
            events,
            listeners: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscribe to changes; counts as a listener until dropped
    pub fn subscribe(&self) -> Subscription {
        self.listeners.fetch_add(1, Ordering::SeqCst);
        Subscription {
            receiver: self.events.subscribe(),
            _listener: ListenerGuard(Arc::clone(&self.listeners)),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    pub fn has_listeners(&self) -> bool {
        self.listener_count() > 0
    }

    pub fn get(&self, id: &ContentId) -> Option<Arc<Wrapper<T>>> {
        self.state.read().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.state.read().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    /// All wrappers in list order
    pub fn snapshot(&self) -> Vec<Arc<Wrapper<T>>> {
        self.state.read().items.clone()
    }

    /// All wrappers sorted by [`Wrapper::compare`]
    pub fn sorted(&self) -> Vec<Arc<Wrapper<T>>> {
        let mut items = self.snapshot();
        items.sort_by(|a, b| a.compare(b));
        items
    }

    pub fn ids(&self) -> Vec<ContentId> {
        self.state.read().items.iter().map(|w| w.id().clone()).collect()
    }

    /// Wrappers that still hold a placeholder
    pub fn unloaded(&self) -> Vec<Arc<Wrapper<T>>> {
        self.state
            .read()
            .items
            .iter()
            .filter(|w| !w.is_loaded())
            .cloned()
            .collect()
    }

    pub fn loaded_items(&self) -> Vec<Arc<T>> {
        self.state
            .read()
            .items
            .iter()
            .filter_map(|w| w.loaded_item())
            .collect()
    }

    pub fn loaded_count(&self) -> usize {
        self.state.read().items.iter().filter(|w| w.is_loaded()).count()
    }

    /// Replace everything; duplicate ids keep their first wrapper
    pub(crate) fn replace_all(&self, wrappers: Vec<Arc<Wrapper<T>>>) {
        let count = {
            let mut state = self.state.write();
            state.items.clear();
            state.by_id.clear();

            for wrapper in wrappers {
                if state.by_id.contains_key(wrapper.id()) {
                    tracing::warn!("Duplicate id {} in scan result, skipping", wrapper.id());
                    continue;
                }
                state.by_id.insert(wrapper.id().clone(), Arc::clone(&wrapper));
                state.items.push(wrapper);
            }

            state.items.len()
        };

        let _ = self.events.send(CollectionEvent::Reset { count });
    }

    /// Append a wrapper; an existing wrapper with the same id is replaced in
    /// place instead
    pub(crate) fn add(&self, wrapper: Arc<Wrapper<T>>) {
        let id = wrapper.id().clone();
        let added = Arc::clone(&wrapper);

        let (previous, event) = {
            let mut state = self.state.write();
            state.by_id.insert(id.clone(), Arc::clone(&wrapper));

            match state.position(&id) {
                Some(pos) => {
                    let previous = std::mem::replace(&mut state.items[pos], wrapper);
                    let event = CollectionEvent::Replaced {
                        old_id: previous.id().clone(),
                        new_id: id,
                    };
                    (Some(previous), event)
                }
                None => {
                    state.items.push(wrapper);
                    (None, CollectionEvent::Added { id })
                }
            }
        };

        if let Some(previous) = previous.filter(|p| !Arc::ptr_eq(p, &added)) {
            if let Some(item) = previous.loaded_item() {
                item.outdate();
            }
        }

        let _ = self.events.send(event);
    }

    /// Remove a wrapper, outdating its loaded item
    pub(crate) fn remove(&self, id: &ContentId) -> Option<Arc<Wrapper<T>>> {
        let removed = {
            let mut state = self.state.write();
            let removed = state.by_id.remove(id)?;
            if let Some(pos) = state.position(id) {
                state.items.remove(pos);
            }
            removed
        };

        if let Some(item) = removed.loaded_item() {
            item.outdate();
        }

        let _ = self.events.send(CollectionEvent::Removed {
            id: removed.id().clone(),
        });
        Some(removed)
    }

    /// Swap the wrapper at `old_id` for `wrapper`, keeping its position.
    ///
    /// If `old_id` is missing the wrapper is appended. Another wrapper
    /// already holding the new id is dropped so ids stay unique.
    pub(crate) fn replace(&self, old_id: &ContentId, wrapper: Arc<Wrapper<T>>) {
        let new_id = wrapper.id().clone();

        let (previous, displaced) = {
            let mut state = self.state.write();

            let displaced = if &new_id != old_id {
                let displaced = state.by_id.remove(&new_id);
                if displaced.is_some() {
                    if let Some(pos) = state.position(&new_id) {
                        state.items.remove(pos);
                    }
                }
                displaced
            } else {
                None
            };

            let previous = state.by_id.remove(old_id);
            match state.position(old_id) {
                Some(pos) => state.items[pos] = Arc::clone(&wrapper),
                None => state.items.push(Arc::clone(&wrapper)),
            }
            state.by_id.insert(new_id.clone(), wrapper);

            (previous, displaced)
        };

        for gone in previous.iter().chain(displaced.iter()) {
            if let Some(item) = gone.loaded_item() {
                item.outdate();
            }
        }

        let event = match previous {
            Some(_) => CollectionEvent::Replaced {
                old_id: old_id.clone(),
                new_id,
            },
            None => CollectionEvent::Added { id: new_id },
        };
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::TestItem;
    use crate::domain::Placeholder;

    fn placeholder(id: &str) -> Arc<Wrapper<TestItem>> {
        Arc::new(Wrapper::new(Placeholder::new(id, true)))
    }

    #[test]
    fn test_replace_all_dedupes_ids() {
        let list = WrapperCollection::new();
        list.replace_all(vec![placeholder("aaa"), placeholder("AAA"), placeholder("bbb")]);

        assert_eq!(list.len(), 2);
        assert_eq!(list.ids(), vec![ContentId::new("aaa"), ContentId::new("bbb")]);
    }

    #[test]
    fn test_listener_count_follows_subscriptions() {
        let list = WrapperCollection::<TestItem>::new();
        assert!(!list.has_listeners());

        let first = list.subscribe();
        let second = list.subscribe();
        assert_eq!(list.listener_count(), 2);

        drop(first);
        assert_eq!(list.listener_count(), 1);
        drop(second);
        assert!(!list.has_listeners());
    }

    #[test]
    fn test_add_existing_id_replaces_in_place() {
        let list = WrapperCollection::new();
        list.replace_all(vec![placeholder("aaa"), placeholder("bbb")]);

        let old = Arc::new(TestItem::new("aaa", true));
        list.replace(&ContentId::new("aaa"), Arc::new(Wrapper::loaded(old.clone())));
        list.add(Arc::new(Wrapper::loaded(Arc::new(TestItem::new("AAA", true)))));

        assert_eq!(list.len(), 2);
        assert_eq!(list.ids()[0], ContentId::new("aaa"));
        assert!(old.is_outdated());
    }

    #[test]
    fn test_events_are_published() {
        let list = WrapperCollection::new();
        let mut sub = list.subscribe();

        list.replace_all(vec![placeholder("aaa")]);
        list.add(placeholder("bbb"));
        list.replace(&ContentId::new("bbb"), placeholder("ccc"));
        list.remove(&ContentId::new("aaa"));

        assert_eq!(sub.try_recv().unwrap(), CollectionEvent::Reset { count: 1 });
        assert_eq!(
            sub.try_recv().unwrap(),
            CollectionEvent::Added {
                id: ContentId::new("bbb")
            }
        );
        assert_eq!(
            sub.try_recv().unwrap(),
            CollectionEvent::Replaced {
                old_id: ContentId::new("bbb"),
                new_id: ContentId::new("ccc")
            }
        );
        assert_eq!(
            sub.try_recv().unwrap(),
            CollectionEvent::Removed {
                id: ContentId::new("aaa")
            }
        );
        assert_eq!(list.ids(), vec![ContentId::new("ccc")]);
    }

    #[test]
    fn test_remove_outdates_loaded_item() {
        let list = WrapperCollection::new();
        let item = Arc::new(TestItem::new("aaa", true));
        list.add(Arc::new(Wrapper::loaded(item.clone())));

        assert!(list.remove(&ContentId::new("aaa")).is_some());
        assert!(item.is_outdated());
        assert!(list.remove(&ContentId::new("aaa")).is_none());
    }

    #[test]
    fn test_concurrent_adds_keep_ids_unique() {
        use std::sync::Barrier;

        for _ in 0..200 {
            let list = Arc::new(WrapperCollection::<TestItem>::new());
            let barrier = Arc::new(Barrier::new(2));

            let racers: Vec<_> = (0..2)
                .map(|_| {
                    let list = Arc::clone(&list);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        list.add(placeholder("aaa"));
                    })
                })
                .collect();
            for racer in racers {
                racer.join().unwrap();
            }

            assert_eq!(list.len(), 1);
            assert_eq!(list.snapshot().len(), 1);
            assert!(list.get(&ContentId::new("aaa")).is_some());
        }
    }

    #[test]
    fn test_re_adding_same_wrapper_keeps_item_current() {
        let list = WrapperCollection::new();
        let item = Arc::new(TestItem::new("aaa", true));
        let wrapper = Arc::new(Wrapper::loaded(item.clone()));

        list.add(Arc::clone(&wrapper));
        list.add(wrapper);

        assert_eq!(list.len(), 1);
        assert!(!item.is_outdated());
    }

    #[test]
    fn test_replace_drops_other_holder_of_new_id() {
        let list = WrapperCollection::new();
        list.replace_all(vec![placeholder("aaa"), placeholder("bbb")]);

        list.replace(&ContentId::new("aaa"), placeholder("bbb"));

        assert_eq!(list.ids(), vec![ContentId::new("bbb")]);
    }
}
