//! Load and delivery statistics

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for loads, reloads and deliveries
///
/// All counters are atomics, cheap to bump from the worker and cheap to
/// read from anywhere.
#[derive(Debug, Default)]
pub struct AssetStats {
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    reloads_completed: AtomicU64,
    reloads_vetoed: AtomicU64,
    deliveries: AtomicU64,
}

impl AssetStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_load(&self) {
        self.loads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self) {
        self.reloads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload_veto(&self) {
        self.reloads_vetoed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Loads that completed successfully (including the load half of a
    /// reload)
    pub fn loads_completed(&self) -> u64 {
        self.loads_completed.load(Ordering::Relaxed)
    }

    pub fn loads_failed(&self) -> u64 {
        self.loads_failed.load(Ordering::Relaxed)
    }

    pub fn reloads_completed(&self) -> u64 {
        self.reloads_completed.load(Ordering::Relaxed)
    }

    pub fn reloads_vetoed(&self) -> u64 {
        self.reloads_vetoed.load(Ordering::Relaxed)
    }

    /// Delivery-queue items processed by the owner thread
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }
}

/// Shared handle to [`AssetStats`]
#[derive(Debug, Clone, Default)]
pub struct AssetStatsHandle {
    inner: Arc<AssetStats>,
}

impl AssetStatsHandle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for AssetStatsHandle {
    type Target = AssetStats;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
