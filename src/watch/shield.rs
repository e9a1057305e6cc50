//! Suppression of watcher events caused by our own file operations.
//!
//! A rename or delete performed by the manager produces filesystem events
//! that would otherwise be reconciled a second time. While any
//! [`ShieldGuard`] is alive, and for a short grace period after the last one
//! is dropped, the watcher discards incoming events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct ShieldState {
    active: Mutex<HashSet<u64>>,
    next: AtomicU64,
    quiet_until: Mutex<Option<Instant>>,
    grace: Duration,
}

/// Shared "ignore changes" switch
#[derive(Clone)]
pub struct ChangeShield {
    state: Arc<ShieldState>,
}

impl ChangeShield {
    pub fn new(grace: Duration) -> Self {
        Self {
            state: Arc::new(ShieldState {
                active: Mutex::new(HashSet::new()),
                next: AtomicU64::new(1),
                quiet_until: Mutex::new(None),
                grace,
            }),
        }
    }

    pub fn grace(&self) -> Duration {
        self.state.grace
    }

    /// Start ignoring; stops `grace` after the returned guard is dropped
    pub fn ignore(&self) -> ShieldGuard {
        let id = self.state.next.fetch_add(1, Ordering::SeqCst);
        self.state.active.lock().insert(id);
        tracing::trace!("Shield {} raised", id);

        ShieldGuard {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// True while a guard is alive or its grace period has not elapsed
    pub fn is_ignoring(&self) -> bool {
        if !self.state.active.lock().is_empty() {
            return true;
        }

        match *self.state.quiet_until.lock() {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    /// Number of live guards
    pub fn active_count(&self) -> usize {
        self.state.active.lock().len()
    }
}

impl Default for ChangeShield {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl std::fmt::Debug for ChangeShield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeShield")
            .field("active", &self.active_count())
            .field("grace", &self.state.grace)
            .finish()
    }
}

/// Keeps the shield raised until dropped
#[must_use = "the shield drops as soon as the guard does"]
pub struct ShieldGuard {
    state: Arc<ShieldState>,
    id: u64,
}

impl Drop for ShieldGuard {
    fn drop(&mut self) {
        self.state.active.lock().remove(&self.id);

        let until = Instant::now() + self.state.grace;
        let mut quiet = self.state.quiet_until.lock();
        if quiet.map_or(true, |current| current < until) {
            *quiet = Some(until);
        }
        tracing::trace!("Shield {} lowered", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ignores_while_guard_alive_and_during_grace() {
        let shield = ChangeShield::new(Duration::from_millis(500));
        assert!(!shield.is_ignoring());

        let guard = shield.ignore();
        assert!(shield.is_ignoring());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(shield.is_ignoring());

        drop(guard);
        assert!(shield.is_ignoring());

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(shield.is_ignoring());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!shield.is_ignoring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_guards() {
        let shield = ChangeShield::new(Duration::from_millis(100));

        let first = shield.ignore();
        let second = shield.ignore();
        assert_eq!(shield.active_count(), 2);

        drop(first);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(shield.is_ignoring());

        drop(second);
        assert_eq!(shield.active_count(), 0);
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert!(!shield.is_ignoring());
    }
}
