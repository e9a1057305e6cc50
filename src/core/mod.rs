//! Core catalogue machinery.
//!
//! This module contains:
//! - Wrapper: per-id handle with single-flight loading
//! - WrapperCollection: observable, id-indexed list of wrappers
//! - BaseManager: scan → load lifecycle over a ContentSource
//! - AsyncScanManager: cancellable variant for async sources
//! - Errors and progress reporting shared by all managers

pub mod async_scan;
pub mod collection;
pub mod error;
pub mod manager;
pub mod progress;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use async_scan::{AsyncContentSource, AsyncScanManager, ScanStatus};
pub use collection::{CollectionEvent, Subscription, WrapperCollection};
pub use error::{CatalogError, LoadError, Result};
pub use manager::{BaseManager, ContentSource, LoadStats, ManagerSettings, ManagerState};
pub use progress::{LoadProgress, ProgressSink, TracingProgress};
pub use wrapper::{ValueChanged, Wrapper, WrapperValue};
