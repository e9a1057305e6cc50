//! Per-location debouncer.
//!
//! Every raw event for an object restarts a short timer. When the timer
//! fires without further events, the accumulated burst is handed to the
//! callback as one [`CoalescedChange`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::domain::{ChangeKind, CoalescedChange};

/// Receives the coalesced change for a location
pub type ChangeHandler = Arc<dyn Fn(PathBuf, CoalescedChange) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Default)]
struct Pending {
    kind: Option<ChangeKind>,
    new_location: Option<PathBuf>,
    full_filename: Option<PathBuf>,
    mixed_files: bool,
    generation: u64,
}

impl Pending {
    fn absorb(&mut self, kind: ChangeKind, new_location: Option<PathBuf>, full_filename: Option<PathBuf>) {
        let first = self.kind.is_none();
        self.kind = Some(match self.kind {
            Some(current) => current.merge(kind),
            None => kind,
        });

        if new_location.is_some() {
            self.new_location = new_location;
        }

        // Keep the file name only while every event names the same file
        if first {
            self.full_filename = full_filename;
        } else if !self.mixed_files && self.full_filename != full_filename {
            self.full_filename = None;
            self.mixed_files = true;
        }
    }

    fn take(&mut self) -> Option<CoalescedChange> {
        let kind = self.kind.take()?;
        let change = CoalescedChange {
            kind,
            new_location: self.new_location.take(),
            full_filename: self.full_filename.take(),
        };
        self.mixed_files = false;
        Some(change)
    }
}

/// Debouncer for one object location
pub struct WatchingTask {
    location: PathBuf,
    delay: Duration,
    pending: Mutex<Pending>,
    applying: tokio::sync::Mutex<()>,
    handler: ChangeHandler,
}

impl WatchingTask {
    pub fn new(location: PathBuf, delay: Duration, handler: ChangeHandler) -> Self {
        Self {
            location,
            delay,
            pending: Mutex::new(Pending::default()),
            applying: tokio::sync::Mutex::new(()),
            handler,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Record a raw event and (re)arm the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_event(
        self: &Arc<Self>,
        kind: ChangeKind,
        new_location: Option<PathBuf>,
        full_filename: Option<PathBuf>,
    ) {
        let generation = {
            let mut pending = self.pending.lock();
            pending.absorb(kind, new_location, full_filename);
            pending.generation += 1;
            pending.generation
        };

        let task = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(task.delay).await;
            task.fire(generation).await;
        });
    }

    async fn fire(&self, generation: u64) {
        // Bursts for one location are applied one after another
        let _applying = self.applying.lock().await;

        let change = {
            let mut pending = self.pending.lock();
            if pending.generation != generation {
                return;
            }
            pending.take()
        };

        if let Some(change) = change {
            tracing::debug!("{} {}", change.kind, self.location.display());
            (self.handler)(self.location.clone(), change).await;
        }
    }
}

impl std::fmt::Debug for WatchingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchingTask")
            .field("location", &self.location)
            .field("delay", &self.delay)
            .finish()
    }
}
