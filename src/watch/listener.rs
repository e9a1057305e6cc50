//! OS filesystem watcher feeding raw events to a listener.

use std::path::PathBuf;
use std::sync::Weak;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::Result;
use crate::domain::RawFsEvent;

/// Receives raw events for the catalogue roots
pub trait DirectoryListener: Send + Sync + 'static {
    fn on_raw_event(&self, event: RawFsEvent);
}

/// Recursive watch over a set of roots.
///
/// Holds the listener weakly; the watch winds down on its own once the
/// listener is dropped.
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    roots: Vec<PathBuf>,
}

impl DirectoryWatcher {
    /// Start watching. Missing roots are skipped with a warning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(roots: Vec<PathBuf>, listener: Weak<dyn DirectoryListener>) -> Result<Self> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RawFsEvent>();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for raw in RawFsEvent::from_notify(&event) {
                        if event_tx.send(raw).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            },
            Config::default(),
        )?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.exists() {
                warn!("Not watching missing directory {}", root.display());
                continue;
            }
            watcher.watch(&root, RecursiveMode::Recursive)?;
            info!("Watching {}", root.display());
            watched.push(root);
        }

        let task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let Some(listener) = listener.upgrade() else {
                    debug!("Listener dropped, stopping watch loop");
                    break;
                };
                listener.on_raw_event(event);
            }
        });

        Ok(Self {
            watcher,
            task,
            roots: watched,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Stop watching and wait for queued events to drain
    pub async fn stop(self) {
        let Self {
            watcher,
            task,
            roots,
        } = self;

        // Dropping the watcher closes the channel and ends the loop
        drop(watcher);
        if let Err(e) = task.await {
            warn!("Watch loop ended abnormally: {}", e);
        }
        info!("Stopped watching {} directories", roots.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeKind;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<RawFsEvent>>,
    }

    impl DirectoryListener for Recorder {
        fn on_raw_event(&self, event: RawFsEvent) {
            self.events.lock().push(event);
        }
    }

    #[tokio::test]
    async fn test_reports_created_directory() {
        let temp = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn DirectoryListener> = recorder.clone();

        let watcher =
            DirectoryWatcher::start(vec![temp.path().to_path_buf()], Arc::downgrade(&listener)).unwrap();
        std::fs::create_dir(temp.path().join("aaa")).unwrap();

        let mut seen = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            seen = recorder
                .events
                .lock()
                .iter()
                .any(|e| e.kind == ChangeKind::Created && e.path.ends_with("aaa"));
            if seen {
                break;
            }
        }

        watcher.stop().await;
        assert!(seen);
    }

    #[tokio::test]
    async fn test_skips_missing_roots() {
        let temp = TempDir::new().unwrap();
        let recorder: Arc<dyn DirectoryListener> = Arc::new(Recorder::default());

        let watcher = DirectoryWatcher::start(
            vec![temp.path().to_path_buf(), temp.path().join("missing")],
            Arc::downgrade(&recorder),
        )
        .unwrap();

        assert_eq!(watcher.roots(), &[temp.path().to_path_buf()]);
        watcher.stop().await;
    }
}
