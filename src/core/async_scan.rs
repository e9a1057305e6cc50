//! Catalogue manager for content without one-directory-per-item backing.
//!
//! Listing and building items are both async and cancellable at item
//! boundaries. Status is explicit and errors never reach callers of
//! [`AsyncScanManager::ensure_loaded_async`]; they show up as
//! [`ScanStatus::Error`] instead.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::collection::WrapperCollection;
use super::error::{CatalogError, Result};
use super::manager::ManagerSettings;
use super::wrapper::Wrapper;
use crate::domain::{ContentId, ContentObject, Placeholder};

/// Async source of items
#[async_trait]
pub trait AsyncContentSource: Send + Sync + 'static {
    type Item: ContentObject;

    /// Discover what is available
    async fn list(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<Placeholder>>;

    /// Build one item
    async fn load(&self, placeholder: &Placeholder) -> anyhow::Result<Self::Item>;
}

/// Status of an async catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Loading,
    Ready,
    Error(String),
}

struct AsyncInner<S: AsyncContentSource> {
    source: S,
    settings: ManagerSettings,
    list: WrapperCollection<S::Item>,
    status: watch::Sender<ScanStatus>,
    scanned: AtomicBool,
    generation: AtomicU64,
    current: Mutex<Option<(u64, CancellationToken)>>,
    last_error: Mutex<Option<String>>,
}

/// Cancellable async catalogue manager
pub struct AsyncScanManager<S: AsyncContentSource> {
    inner: Arc<AsyncInner<S>>,
}

impl<S: AsyncContentSource> Clone for AsyncScanManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AsyncContentSource> AsyncScanManager<S> {
    pub fn new(source: S) -> Self {
        Self::with_settings(source, ManagerSettings::default())
    }

    pub fn with_settings(source: S, settings: ManagerSettings) -> Self {
        let (status, _) = watch::channel(ScanStatus::Loading);
        Self {
            inner: Arc::new(AsyncInner {
                source,
                settings,
                list: WrapperCollection::new(),
                status,
                scanned: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                current: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn list(&self) -> &WrapperCollection<S::Item> {
        &self.inner.list
    }

    pub fn status(&self) -> ScanStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_scanned(&self) -> bool {
        self.inner.scanned.load(Ordering::SeqCst)
    }

    /// Last per-item failure from the most recent scan
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Scan unless a successful scan already happened.
    ///
    /// Joins a scan already in flight instead of replacing it. If that scan
    /// gets superseded, waits for the one that replaced it.
    pub async fn scan_async(&self) -> Result<()> {
        if self.is_scanned() && self.status() == ScanStatus::Ready {
            return Ok(());
        }

        if let Some(started) = self.begin_scan(false) {
            if let Some(result) = self.run_scan(started).await {
                return result;
            }
        }
        self.join_scan().await
    }

    /// Scan now, cancelling and replacing any scan in flight
    pub async fn rescan_async(&self) -> Result<()> {
        let started = self.begin_scan(true);
        match started {
            Some(started) => self.run_scan(started).await.unwrap_or_else(|| {
                Err(CatalogError::Cancelled {
                    reason: "Scan superseded by a newer one".to_string(),
                })
            }),
            None => self.join_scan().await,
        }
    }

    /// Register a new scan. Without `replace`, returns `None` while another
    /// scan is in flight.
    fn begin_scan(&self, replace: bool) -> Option<(u64, CancellationToken)> {
        let mut current = self.inner.current.lock();
        if let Some((_, previous)) = current.as_ref() {
            if !replace {
                return None;
            }
            previous.cancel();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *current = Some((generation, token.clone()));
        self.inner.status.send_replace(ScanStatus::Loading);
        Some((generation, token))
    }

    /// Run a registered scan; `None` if a newer scan replaced it
    async fn run_scan(&self, (generation, token): (u64, CancellationToken)) -> Option<Result<()>> {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(CatalogError::Cancelled {
                reason: "Scan cancelled".to_string(),
            }),
            result = self.actual_scan(&token) => result,
        };

        // Status is settled under the same lock that registers scans, so no
        // scan is ever in flight with a terminal status
        let mut current = self.inner.current.lock();
        match current.as_ref() {
            Some((active, _)) if *active == generation => {
                current.take();
            }
            _ => {
                tracing::debug!("Scan {} superseded", generation);
                return None;
            }
        }

        Some(match result {
            Ok(wrappers) => {
                for item in self.inner.list.loaded_items() {
                    item.outdate();
                }
                let count = wrappers.len();
                self.inner.list.replace_all(wrappers);
                self.inner.scanned.store(true, Ordering::SeqCst);
                self.inner.status.send_replace(ScanStatus::Ready);
                tracing::info!("Async scan ready with {} items", count);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Async scan failed: {}", e);
                self.inner.status.send_replace(ScanStatus::Error(status_message(&e)));
                Err(e)
            }
        })
    }

    /// Wait for the scan in flight to settle
    async fn join_scan(&self) -> Result<()> {
        let mut status = self.inner.status.subscribe();
        let settled = status
            .wait_for(|s| *s != ScanStatus::Loading)
            .await
            .map(|s| s.clone())
            .map_err(|_| CatalogError::Cancelled {
                reason: "Manager dropped".to_string(),
            })?;

        match settled {
            ScanStatus::Error(reason) => Err(CatalogError::Scan { reason }),
            _ => Ok(()),
        }
    }

    async fn actual_scan(&self, token: &CancellationToken) -> Result<Vec<Arc<Wrapper<S::Item>>>> {
        let placeholders = self
            .inner
            .source
            .list(token)
            .await
            .map_err(|e| CatalogError::Scan {
                reason: format!("{:#}", e),
            })?;

        self.inner.last_error.lock().take();
        let concurrency = self.inner.settings.load_concurrency.max(1);

        let built: Vec<Option<Arc<Wrapper<S::Item>>>> = stream::iter(placeholders)
            .map(|placeholder| async move {
                if token.is_cancelled() {
                    return None;
                }
                match self.inner.source.load(&placeholder).await {
                    Ok(item) => {
                        item.past_load();
                        Some(Arc::new(Wrapper::loaded(Arc::new(item))))
                    }
                    Err(e) => {
                        let message = format!("Failed to load {}: {:#}", placeholder.id, e);
                        tracing::warn!("{}", message);
                        *self.inner.last_error.lock() = Some(message);
                        None
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        if token.is_cancelled() {
            return Err(CatalogError::Cancelled {
                reason: "Scan cancelled".to_string(),
            });
        }

        Ok(built.into_iter().flatten().collect())
    }

    /// Cancel the scan in flight, if any
    pub fn cancel(&self) {
        if let Some((_, token)) = self.inner.current.lock().as_ref() {
            token.cancel();
        }
    }

    /// Scan if needed; failures are reported through the status only
    pub async fn ensure_loaded_async(&self) -> ScanStatus {
        match self.scan_async().await {
            Ok(()) => ScanStatus::Ready,
            Err(e) => {
                tracing::debug!("ensure_loaded_async: {}", e);
                ScanStatus::Error(status_message(&e))
            }
        }
    }

    pub async fn get_by_id_async(&self, id: &ContentId) -> Option<Arc<S::Item>> {
        self.ensure_loaded_async().await;
        self.inner.list.get(id).and_then(|w| w.loaded_item())
    }
}

/// Text shown in `ScanStatus::Error`
fn status_message(error: &CatalogError) -> String {
    match error {
        CatalogError::Scan { reason } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::TestItem;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct ServerList {
        ids: Vec<&'static str>,
        delay: Option<Duration>,
        fail: bool,
        broken: Option<&'static str>,
        listed: AtomicUsize,
    }

    #[async_trait]
    impl AsyncContentSource for ServerList {
        type Item = TestItem;

        async fn list(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<Placeholder>> {
            self.listed.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => anyhow::bail!("interrupted"),
                }
            }
            if self.fail {
                anyhow::bail!("server list unavailable");
            }
            Ok(self.ids.iter().map(|id| Placeholder::new(*id, true)).collect())
        }

        async fn load(&self, placeholder: &Placeholder) -> anyhow::Result<TestItem> {
            if Some(placeholder.id.as_str()) == self.broken {
                anyhow::bail!("malformed entry");
            }
            Ok(TestItem::new(placeholder.id.as_str(), true))
        }
    }

    #[tokio::test]
    async fn test_scan_becomes_ready_and_is_idempotent() {
        let manager = AsyncScanManager::new(ServerList {
            ids: vec!["alpha", "beta"],
            ..Default::default()
        });

        assert_eq!(manager.ensure_loaded_async().await, ScanStatus::Ready);
        assert_eq!(manager.ensure_loaded_async().await, ScanStatus::Ready);

        assert_eq!(manager.list().len(), 2);
        assert_eq!(manager.source().listed.load(Ordering::SeqCst), 1);
        assert!(manager.get_by_id_async(&ContentId::new("BETA")).await.is_some());
    }

    #[tokio::test]
    async fn test_failure_sets_error_status() {
        let manager = AsyncScanManager::new(ServerList {
            fail: true,
            ..Default::default()
        });

        let status = manager.ensure_loaded_async().await;
        assert!(matches!(status, ScanStatus::Error(ref m) if m.contains("server list unavailable")));
        assert!(!manager.is_scanned());
    }

    #[tokio::test]
    async fn test_item_failure_is_recorded_not_fatal() {
        let manager = AsyncScanManager::new(ServerList {
            ids: vec!["alpha", "broken", "gamma"],
            broken: Some("broken"),
            ..Default::default()
        });

        assert_eq!(manager.ensure_loaded_async().await, ScanStatus::Ready);
        assert_eq!(manager.list().len(), 2);
        assert!(manager.last_error().unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn test_new_scan_supersedes_running_one() {
        let manager = AsyncScanManager::new(ServerList {
            ids: vec!["alpha"],
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.rescan_async().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.rescan_async().await.unwrap();
        let first = first.await.unwrap();

        assert!(matches!(first, Err(CatalogError::Cancelled { .. })));
        assert_eq!(manager.status(), ScanStatus::Ready);
        assert_eq!(manager.list().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_callers_share_one_scan() {
        let manager = AsyncScanManager::new(ServerList {
            ids: vec!["alpha", "beta"],
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_loaded_async().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let found = manager.get_by_id_async(&ContentId::new("alpha")).await;
        let first = first.await.unwrap();

        assert!(found.is_some());
        assert_eq!(first, ScanStatus::Ready);
        assert_eq!(manager.source().listed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_superseded_caller_waits_for_newer_scan() {
        let manager = AsyncScanManager::new(ServerList {
            ids: vec!["alpha"],
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_loaded_async().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.rescan_async().await.unwrap();
        let first = first.await.unwrap();

        assert_eq!(first, ScanStatus::Ready);
        assert_eq!(manager.source().listed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_joined_caller_sees_same_failure() {
        let manager = AsyncScanManager::new(ServerList {
            delay: Some(Duration::from_millis(100)),
            fail: true,
            ..Default::default()
        });

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_loaded_async().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = manager.ensure_loaded_async().await;
        let first = first.await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, ScanStatus::Error("server list unavailable".to_string()));
        assert_eq!(manager.source().listed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_sets_error_status() {
        let manager = AsyncScanManager::new(ServerList {
            ids: vec!["alpha"],
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        });

        let scan = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_loaded_async().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.cancel();

        let status = scan.await.unwrap();
        assert!(matches!(status, ScanStatus::Error(ref m) if m.contains("cancelled")));
    }
}
