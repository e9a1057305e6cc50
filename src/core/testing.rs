//! In-memory item used by unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use parking_lot::Mutex;

use crate::domain::{ContentId, ContentObject};

#[derive(Debug)]
pub(crate) struct TestItem {
    id: ContentId,
    location: PathBuf,
    enabled: bool,
    previous_id: Mutex<Option<ContentId>>,
    outdated: AtomicBool,
    changed: AtomicBool,
    pub loads: AtomicUsize,
    pub reloads: AtomicUsize,
}

impl TestItem {
    pub fn new(id: &str, enabled: bool) -> Self {
        let root = if enabled { "/test/enabled" } else { "/test/disabled" };
        Self::at(id, enabled, Path::new(root).join(id))
    }

    pub fn at(id: &str, enabled: bool, location: PathBuf) -> Self {
        Self {
            id: ContentId::new(id),
            location,
            enabled,
            previous_id: Mutex::new(None),
            outdated: AtomicBool::new(false),
            changed: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
        }
    }

    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }
}

impl ContentObject for TestItem {
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
        self.changed.load(Ordering::SeqCst)
    }

    fn previous_id(&self) -> Option<ContentId> {
        self.previous_id.lock().clone()
    }

    fn set_previous_id(&self, id: ContentId) {
        *self.previous_id.lock() = Some(id);
    }

    fn load(&self) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn outdate(&self) {
        self.outdated.store(true, Ordering::SeqCst);
    }

    fn is_outdated(&self) -> bool {
        self.outdated.load(Ordering::SeqCst)
    }
}
