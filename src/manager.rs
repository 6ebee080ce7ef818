//! Public façade over the cache, queues, registry and worker
//!
//! The [`AssetManager`] is an explicit value with explicit teardown, not
//! a global. Requester threads call `request`/`release`/`sweep`; only
//! the owner thread calls [`AssetManager::deliver`] and
//! [`AssetManager::finish_pending`]; only the worker thread invokes
//! loader callbacks.

use crate::cache::AssetCache;
use crate::error::{panic_reason, AssetError, Result};
use crate::events::{LoadResult, ReloadPhase};
use crate::queue::{Delivery, WorkQueues, WorkSignal};
use crate::record::{AssetHandle, AssetRecord, TypeTag};
use crate::registry::{AssetLoader, LoaderFlags, LoaderRegistry};
use crate::stats::AssetStatsHandle;
use crate::vfs::FileSystem;
use crate::worker::LoaderWorker;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default dependency recursion limit; deeper chains fail the load
/// instead of recursing further
pub const DEFAULT_DEPTH_LIMIT: usize = 16;

/// Bound on one `deliver` call
#[derive(Debug, Clone, Copy)]
pub enum DeliveryBudget {
    /// Process at most this many queue items
    Items(usize),
    /// Process until this much wall clock has elapsed
    Time(Duration),
    /// Drain the whole queue
    Unlimited,
}

/// State shared between the façade and the worker thread
pub(crate) struct Shared {
    pub cache: AssetCache,
    pub registry: LoaderRegistry,
    pub queues: WorkQueues,
    pub signal: WorkSignal,
    pub fs: Arc<dyn FileSystem>,
    pub stats: AssetStatsHandle,
    pub paused: RwLock<HashSet<TypeTag>>,
    /// Records decoded off-thread, awaiting their context-bound finish
    pub pending_finish: Mutex<Vec<Arc<AssetRecord>>>,
    pub depth_limit: usize,
    pub hot_reload_enabled: AtomicBool,
}

/// The asset system façade
pub struct AssetManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AssetManager {
    /// Create a manager over the given filesystem with the default
    /// dependency depth limit
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self::with_depth_limit(fs, DEFAULT_DEPTH_LIMIT)
    }

    pub fn with_depth_limit(fs: Arc<dyn FileSystem>, depth_limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache: AssetCache::new(),
                registry: LoaderRegistry::new(),
                queues: WorkQueues::default(),
                signal: WorkSignal::default(),
                fs,
                stats: AssetStatsHandle::new(),
                paused: RwLock::new(HashSet::new()),
                pending_finish: Mutex::new(Vec::new()),
                depth_limit,
                hot_reload_enabled: AtomicBool::new(true),
            }),
            worker: Mutex::new(None),
        }
    }

    // --- registry ---------------------------------------------------

    pub fn register_loader(&self, tag: TypeTag, loader: Arc<dyn AssetLoader>) {
        self.shared.registry.register(tag, loader);
    }

    pub fn register_loader_with_flags(
        &self,
        tag: TypeTag,
        loader: Arc<dyn AssetLoader>,
        flags: LoaderFlags,
    ) {
        self.shared.registry.register_with_flags(tag, loader, flags);
    }

    pub fn set_loader_flags(&self, tag: TypeTag, flags: LoaderFlags) -> bool {
        self.shared.registry.set_flags(tag, flags)
    }

    pub fn has_loader(&self, tag: TypeTag) -> bool {
        self.shared.registry.has_loader(tag)
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.shared.registry
    }

    pub fn stats(&self) -> &AssetStatsHandle {
        &self.shared.stats
    }

    // --- requests ---------------------------------------------------

    /// Get or create the record without queueing a load
    pub fn get_or_create(&self, tag: TypeTag, path: &str) -> AssetHandle {
        AssetHandle::adopt(self.shared.cache.get_or_create(tag, path))
    }

    /// Request an asset; `on_loaded` fires on the owner thread once the
    /// load completes (or immediately via the delivery path when the
    /// record is already loaded). Higher `priority` serves first.
    pub fn request(
        &self,
        tag: TypeTag,
        path: &str,
        priority: i32,
        on_loaded: impl FnOnce(LoadResult) + Send + 'static,
    ) -> AssetHandle {
        let record = self.shared.cache.get_or_create(tag, path);
        let handle = AssetHandle::adopt(Arc::clone(&record));

        // Subscribe before checking state so a racing completion still
        // picks the callback up
        record.on_loaded.subscribe(Box::new(on_loaded));

        if record.is_loaded() {
            self.shared.queues.delivery.push(Delivery {
                record,
                error: None,
            });
        } else if !record.needs_finish()
            && record
                .queued_to_load
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.shared.queues.load.push(priority, record);
            self.shared.signal.notify_work();
        }
        handle
    }

    /// Drop a handle, decrementing the record's reference count; same
    /// as letting the handle fall out of scope
    pub fn release(&self, handle: AssetHandle) {
        drop(handle);
    }

    // --- unload -----------------------------------------------------

    /// Queue an explicit unload for `(tag, path)`, ignoring the pause
    /// set; returns whether anything was queued
    pub fn unload_path(&self, tag: TypeTag, path: &str) -> bool {
        match self.shared.cache.get(tag, path) {
            Some(record) => self.queue_unload(&record),
            None => false,
        }
    }

    fn queue_unload(&self, record: &Arc<AssetRecord>) -> bool {
        if !self.shared.registry.can_unload(record.tag()) {
            return false;
        }
        let context_bound = {
            let state = record.state.lock();
            if !state.loaded && state.staged.is_none() {
                return false;
            }
            state.requires_finish && state.loaded
        };
        if record
            .queued_to_unload
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if context_bound {
            // Finished payload owns context resources; the owner thread
            // tears it down in finish_pending
            self.shared.queues.unload_context.push(Arc::clone(record));
        } else {
            self.shared.queues.unload_local.push(Arc::clone(record));
            self.shared.signal.notify_work();
        }
        true
    }

    /// Queue every unreferenced, unpaused record for unload; returns
    /// how many were queued
    pub fn sweep_unreferenced(&self) -> usize {
        let paused = self.shared.paused.read();
        let mut queued = 0;
        for record in self.shared.cache.snapshot() {
            if record.ref_count() != 1 || paused.contains(&record.tag()) {
                continue;
            }
            if self.queue_unload(&record) {
                queued += 1;
            }
        }
        queued
    }

    /// Exempt a whole type from sweeping (explicit unloads still work)
    pub fn pause_unload(&self, tag: TypeTag) {
        self.shared.paused.write().insert(tag);
    }

    pub fn resume_unload(&self, tag: TypeTag) {
        self.shared.paused.write().remove(&tag);
    }

    pub fn is_unload_paused(&self, tag: TypeTag) -> bool {
        self.shared.paused.read().contains(&tag)
    }

    // --- owner thread -----------------------------------------------

    /// Pop completed loads and fire their callbacks, bounded by
    /// `budget`; remaining items wait for the next call. Owner thread
    /// only.
    pub fn deliver(&self, budget: DeliveryBudget) -> usize {
        let start = Instant::now();
        let mut processed = 0;
        loop {
            match budget {
                DeliveryBudget::Items(max) if processed >= max => break,
                DeliveryBudget::Time(limit) if start.elapsed() >= limit => break,
                _ => {}
            }
            let Some(delivery) = self.shared.queues.delivery.try_pop() else {
                break;
            };

            let callbacks = delivery.record.on_loaded.drain();
            match delivery.error {
                None => {
                    for callback in callbacks {
                        callback(Ok(AssetHandle::adopt(Arc::clone(&delivery.record))));
                    }
                }
                Some(error) => {
                    for callback in callbacks {
                        callback(Err(Arc::clone(&error)));
                    }
                }
            }
            self.shared.stats.record_delivery();
            processed += 1;
        }
        processed
    }

    /// Run pending context-bound unloads and finishes with the opaque
    /// context. Owner thread only; returns how many records finished.
    pub fn finish_pending(&self, context: &mut dyn Any) -> usize {
        while let Some(record) = self.shared.queues.unload_context.pop() {
            let (data, dependencies) = {
                let mut state = record.state.lock();
                state.loaded = false;
                state.staged = None;
                state.marked_for_reload = false;
                (state.data.take(), std::mem::take(&mut state.dependencies))
            };
            if let Some(data) = data {
                log::debug!("unloading {} {:?}", record.tag(), record.path());
                if let Some(loader) = self.shared.registry.loader(record.tag()) {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        loader.unload_finished(&record, data, &mut *context)
                    }));
                    if outcome.is_err() {
                        log::warn!("context unload of {:?} panicked", record.path());
                    }
                }
            }
            for edge in dependencies {
                edge.release();
            }
            record.queued_to_unload.store(false, Ordering::Release);
        }

        let pending: Vec<_> = std::mem::take(&mut *self.shared.pending_finish.lock());
        let mut finished = 0;
        for record in pending {
            let Some(loader) = self.shared.registry.loader(record.tag()) else {
                continue;
            };
            // Unloaded while staged: nothing left to finish
            let Some(staged) = record.state.lock().staged.take() else {
                continue;
            };

            let result = catch_unwind(AssertUnwindSafe(|| {
                loader.finish(&record, staged, &mut *context)
            }))
            .unwrap_or_else(|payload| {
                Err(AssetError::FinishFailed {
                    path: record.path().to_string(),
                    reason: format!("finish panicked: {}", panic_reason(payload)),
                })
            });
            match result {
                Ok(data) => {
                    let was_reload = {
                        let mut state = record.state.lock();
                        state.data = Some(data);
                        state.loaded = true;
                        let was_reload = state.marked_for_reload;
                        state.marked_for_reload = false;
                        was_reload
                    };
                    self.shared.stats.record_load();
                    if was_reload {
                        self.shared.stats.record_reload();
                        record.on_hot_reload().fire(ReloadPhase::PostReload);
                    }
                    self.shared.queues.delivery.push(Delivery {
                        record,
                        error: None,
                    });
                    finished += 1;
                }
                Err(error) => {
                    let error = Arc::new(error);
                    log::warn!("finish failed for {:?}: {}", record.path(), error);
                    self.shared.stats.record_load_failure();
                    record.set_marked_for_reload(false);
                    self.shared.queues.delivery.push(Delivery {
                        record,
                        error: Some(error),
                    });
                }
            }
        }
        finished
    }

    /// Clear the delivery queue and drop all pending subscriptions
    /// without invoking them
    pub fn cancel_all_deliveries(&self) {
        self.shared.queues.delivery.clear();
        for record in self.shared.cache.snapshot() {
            record.on_loaded.clear();
        }
    }

    // --- hot reload -------------------------------------------------

    pub fn set_hot_reload_enabled(&self, enabled: bool) {
        self.shared
            .hot_reload_enabled
            .store(enabled, Ordering::Relaxed);
    }

    /// Ask the worker to probe loaded records for changes; no-op when
    /// hot reload is disabled
    pub fn check_for_changes(&self) {
        if self.shared.hot_reload_enabled.load(Ordering::Relaxed) {
            self.shared.signal.request_check_changes();
        }
    }

    /// Probe for changes even when hot reload is disabled
    pub fn force_check_for_changes(&self) {
        self.shared.signal.request_check_changes();
    }

    // --- worker lifecycle -------------------------------------------

    /// Spawn the loader worker thread; idempotent while one is running
    pub fn start_worker(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(handle) = slot.take() {
            let _ = handle.join();
        }

        self.shared.signal.reset();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("resource-loader".into())
            .spawn(move || LoaderWorker::new(shared).run())?;
        *slot = Some(handle);
        Ok(())
    }

    /// Ask the worker to abandon remaining work and exit; non-blocking
    pub fn stop_worker(&self) {
        self.shared.signal.request_stop(false);
    }

    /// Ask the worker to drain all queues, then exit; non-blocking
    pub fn stop_worker_when_idle(&self) {
        self.shared.signal.request_stop(true);
    }

    /// Wait for a stopping worker to exit
    pub fn join_worker(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn worker_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // --- queries ----------------------------------------------------

    pub fn pending_loads(&self) -> usize {
        self.shared.queues.load.len()
    }

    pub fn pending_deliveries(&self) -> usize {
        self.shared.queues.delivery.len()
    }

    pub fn pending_finishes(&self) -> usize {
        self.shared.pending_finish.lock().len()
    }

    pub fn pending_unloads(&self) -> usize {
        self.shared.queues.unload_local.len() + self.shared.queues.unload_context.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_loads() == 0
            && self.pending_deliveries() == 0
            && self.pending_finishes() == 0
            && self.pending_unloads() == 0
    }

    pub fn record_count(&self) -> usize {
        self.shared.cache.len()
    }

    /// `(type, path)` of every currently loaded record
    pub fn list_loaded(&self) -> Vec<(TypeTag, String)> {
        self.shared
            .cache
            .snapshot()
            .into_iter()
            .filter(|record| record.is_loaded())
            .map(|record| (record.tag(), record.path().to_string()))
            .collect()
    }

    /// Loaded paths matching a `*`/`?` wildcard pattern
    ///
    /// With `recursive` false, wildcards do not cross `/` separators.
    pub fn find(&self, pattern: &str, recursive: bool, case_sensitive: bool) -> Vec<String> {
        let mut matches: Vec<String> = self
            .shared
            .cache
            .snapshot()
            .into_iter()
            .filter(|record| record.is_loaded())
            .map(|record| record.path().to_string())
            .filter(|path| wildcard_match(pattern, path, recursive, case_sensitive))
            .collect();
        matches.sort();
        matches.dedup();
        matches
    }

    // --- teardown ---------------------------------------------------

    /// Drop every record and queued item; callbacks are not invoked.
    /// Stop the worker before tearing down.
    pub fn delete_all(&self) {
        self.shared.queues.load.clear();
        self.shared.queues.unload_local.clear();
        self.shared.queues.unload_context.clear();
        self.shared.queues.delivery.clear();
        self.shared.queues.reload.clear();
        self.shared.pending_finish.lock().clear();
        self.shared.cache.clear();
    }
}

impl Drop for AssetManager {
    fn drop(&mut self) {
        self.shared.signal.request_stop(false);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// `*`/`?` wildcard match; `recursive` lets wildcards cross `/`
fn wildcard_match(pattern: &str, text: &str, recursive: bool, case_sensitive: bool) -> bool {
    fn matches(pattern: &[char], text: &[char], recursive: bool) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some('*') => {
                if matches(&pattern[1..], text, recursive) {
                    return true;
                }
                match text.first() {
                    Some(&c) if recursive || c != '/' => matches(pattern, &text[1..], recursive),
                    _ => false,
                }
            }
            Some('?') => match text.first() {
                Some(&c) if recursive || c != '/' => matches(&pattern[1..], &text[1..], recursive),
                _ => false,
            },
            Some(&p) => match text.first() {
                Some(&c) if c == p => matches(&pattern[1..], &text[1..], recursive),
                _ => false,
            },
        }
    }

    if case_sensitive {
        let pattern: Vec<char> = pattern.chars().collect();
        let text: Vec<char> = text.chars().collect();
        matches(&pattern, &text, recursive)
    } else {
        let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
        let text: Vec<char> = text.to_lowercase().chars().collect();
        matches(&pattern, &text, recursive)
    }
}
