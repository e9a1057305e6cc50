//! Progress reporting for bulk loads.

/// Snapshot of a bulk load pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    /// Items finished in this pass
    pub done: usize,

    /// Items scheduled in this pass
    pub total: usize,
}

impl LoadProgress {
    /// Fraction complete in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

/// Receives progress while a manager loads in bulk (taskbar, status line, ...)
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: LoadProgress);
}

/// Progress sink that logs through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, progress: LoadProgress) {
        tracing::debug!(
            "Loaded {}/{} ({:.0}%)",
            progress.done,
            progress.total,
            progress.fraction() * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        assert_eq!(LoadProgress { done: 1, total: 4 }.fraction(), 0.25);
        assert_eq!(LoadProgress { done: 0, total: 0 }.fraction(), 1.0);
    }
}
