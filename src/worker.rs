//! Background loader worker
//!
//! Exactly one worker thread drains the unload and load queues, resolves
//! dependencies recursively under a depth limit, invokes loader
//! callbacks and republishes results on the delivery queue. Loader
//! failures are converted into per-request failure notifications; they
//! never unwind across the loop.

use crate::error::{panic_reason, AssetError};
use crate::events::ReloadPhase;
use crate::manager::Shared;
use crate::queue::{Delivery, Wakeup};
use crate::record::{AssetHandle, AssetRecord, DependencyEdge};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) struct LoaderWorker {
    shared: Arc<Shared>,
}

impl LoaderWorker {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn run(&self) {
        log::debug!("loader worker started");
        loop {
            let wake = self.shared.signal.wait(|| self.has_pending_work());
            match wake {
                Wakeup::Stop { drain: false } => break,
                Wakeup::Stop { drain: true } => {
                    self.drain_remaining();
                    break;
                }
                Wakeup::CheckChanges => {
                    self.check_for_changes();
                    self.process_reloads();
                }
                Wakeup::Work => {
                    self.drain_unloads();
                    if let Some(request) = self.shared.queues.load.pop() {
                        let _ = self.load_and_publish(
                            &request.record,
                            request.priority,
                            self.shared.depth_limit,
                        );
                    }
                    self.process_reloads();
                }
            }
        }
        log::debug!("loader worker exited");
    }

    fn has_pending_work(&self) -> bool {
        !self.shared.queues.load.is_empty()
            || !self.shared.queues.unload_local.is_empty()
            || !self.shared.queues.reload.is_empty()
    }

    /// Finish everything already queued, then return
    fn drain_remaining(&self) {
        loop {
            self.drain_unloads();
            if let Some(request) = self.shared.queues.load.pop() {
                let _ =
                    self.load_and_publish(&request.record, request.priority, self.shared.depth_limit);
                continue;
            }
            self.process_reloads();
            if self.shared.queues.load.is_empty()
                && self.shared.queues.unload_local.is_empty()
                && self.shared.queues.reload.is_empty()
            {
                break;
            }
        }
    }

    /// Load a record, clear its queued flag and publish the outcome on
    /// the delivery queue
    fn load_and_publish(
        &self,
        record: &Arc<AssetRecord>,
        priority: i32,
        depth: usize,
    ) -> Result<(), Arc<AssetError>> {
        if record.is_loaded() {
            // Another path loaded it first (e.g. as a blocking
            // dependency); still deliver so late subscribers fire
            record.queued_to_load.store(false, Ordering::Release);
            self.shared.queues.delivery.push(Delivery {
                record: Arc::clone(record),
                error: None,
            });
            return Ok(());
        }

        let result = self.load_record(record, priority, depth);
        record.queued_to_load.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                if record.is_loaded() {
                    record.set_marked_for_reload(false);
                    self.shared.stats.record_load();
                    self.shared.queues.delivery.push(Delivery {
                        record: Arc::clone(record),
                        error: None,
                    });
                }
                // Otherwise the record is staged for a context-bound
                // finish; delivery happens after finish_pending
                Ok(())
            }
            Err(error) => {
                let error = Arc::new(error);
                self.shared.stats.record_load_failure();
                log::warn!(
                    "load failed for {} {:?}: {}",
                    record.tag(),
                    record.path(),
                    error
                );
                self.shared.queues.delivery.push(Delivery {
                    record: Arc::clone(record),
                    error: Some(Arc::clone(&error)),
                });
                Err(error)
            }
        }
    }

    /// Resolve dependencies and invoke the type's load callback
    fn load_record(
        &self,
        record: &Arc<AssetRecord>,
        priority: i32,
        depth: usize,
    ) -> Result<(), AssetError> {
        if record.is_loaded() {
            return Ok(());
        }
        if record.needs_finish() {
            // Already decoded, waiting on the owner-thread finish
            return Ok(());
        }
        if depth == 0 {
            return Err(AssetError::DependencyTooDeep {
                path: record.path().to_string(),
            });
        }

        let tag = record.tag();
        let registry = &self.shared.registry;
        let loader = registry.loader(tag).ok_or(AssetError::NoLoader(tag))?;
        if !registry.can_load(tag) {
            return Err(AssetError::LoadDisabled(tag));
        }

        let listed = catch_unwind(AssertUnwindSafe(|| loader.dependencies(record))).map_err(
            |payload| {
                AssetError::load_failed(
                    record.path(),
                    format!("dependency listing panicked: {}", panic_reason(payload)),
                )
            },
        )?;
        let blocking = listed.blocking;
        let mut resolved: Vec<Arc<AssetRecord>> = Vec::with_capacity(listed.assets.len());
        for (dep_tag, dep_path) in listed.assets {
            let dep = self.shared.cache.get_or_create(dep_tag, &dep_path);
            if Arc::ptr_eq(&dep, record) {
                // A record listing itself would pin its own ref count;
                // the depth limit already covers longer cycles
                continue;
            }
            if blocking {
                if !dep.is_loaded() {
                    self.load_and_publish(&dep, priority, depth - 1)
                        .map_err(|error| {
                            AssetError::load_failed(
                                record.path(),
                                format!("dependency {} failed: {}", dep_path, error),
                            )
                        })?;
                }
            } else if !dep.is_loaded()
                && dep
                    .queued_to_load
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                // Loads later at the dependent's priority
                self.shared.queues.load.push(priority, Arc::clone(&dep));
            }
            resolved.push(dep);
        }

        log::debug!("loading {} {:?}", tag, record.path());
        let loaded = catch_unwind(AssertUnwindSafe(|| loader.load(record, self.shared.fs.as_ref())))
            .unwrap_or_else(|payload| {
                Err(AssetError::load_failed(
                    record.path(),
                    format!("load panicked: {}", panic_reason(payload)),
                ))
            })?;
        let requires_finish = loader.requires_finish();

        // Subscribe the dependent's reload voters before taking the state
        // lock; a vote may read this record's state
        let held: Vec<Arc<AssetRecord>> = {
            let state = record.state.lock();
            state
                .dependencies
                .iter()
                .map(|edge| Arc::clone(edge.handle.record()))
                .collect()
        };
        let mut edges: Vec<DependencyEdge> = Vec::new();
        for dep in resolved {
            if held.iter().any(|known| Arc::ptr_eq(known, &dep)) {
                continue;
            }
            // The dependent votes on its dependency's reloads
            let dependent = Arc::downgrade(record);
            let dependency = Arc::downgrade(&dep);
            let voter_loader = Arc::clone(&loader);
            let voter = dep.on_hot_reload().subscribe(move |phase| {
                match (dependent.upgrade(), dependency.upgrade()) {
                    (Some(dependent), Some(dependency)) => {
                        // A panicking vote counts as a veto
                        catch_unwind(AssertUnwindSafe(|| {
                            voter_loader.validate_reload(&dependent, &dependency, phase)
                        }))
                        .unwrap_or(false)
                    }
                    _ => true,
                }
            });
            edges.push(DependencyEdge {
                handle: AssetHandle::adopt(dep),
                voter,
            });
        }

        {
            let mut state = record.state.lock();
            state.dependencies.extend(edges);
            if let Some(metadata) = loaded.metadata {
                state.metadata = Some(metadata);
            }
            if requires_finish {
                state.staged = Some(loaded.data);
                state.requires_finish = true;
            } else {
                state.data = Some(loaded.data);
                state.loaded = true;
            }
        }

        if requires_finish {
            self.shared
                .pending_finish
                .lock()
                .push(Arc::clone(record));
        }
        Ok(())
    }

    fn drain_unloads(&self) {
        while let Some(record) = self.shared.queues.unload_local.pop() {
            self.unload_local(&record);
            // An unload interrupting a parked reload also cancels it, so
            // the next change check can mark the record again
            record.set_marked_for_reload(false);
            record.queued_to_unload.store(false, Ordering::Release);
        }
    }

    /// Context-free unload: clear state and hand the payload to the
    /// loader, keeping the cache entry
    pub(crate) fn unload_local(&self, record: &Arc<AssetRecord>) {
        let (data, dependencies) = {
            let mut state = record.state.lock();
            state.loaded = false;
            state.staged = None;
            (state.data.take(), std::mem::take(&mut state.dependencies))
        };

        if let Some(data) = data {
            log::debug!("unloading {} {:?}", record.tag(), record.path());
            if let Some(loader) = self.shared.registry.loader(record.tag()) {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    loader.unload(record, data, self.shared.fs.as_ref())
                }));
                if outcome.is_err() {
                    log::warn!("unload of {} {:?} panicked", record.tag(), record.path());
                }
            }
        }
        // Voter subscriptions and keep-alive references release after
        // the payload is gone
        for edge in dependencies {
            edge.release();
        }
    }

    fn check_for_changes(&self) {
        log::debug!("checking loaded assets for changes");
        for record in self.shared.cache.snapshot() {
            if !record.is_loaded() || record.is_marked_for_reload() {
                continue;
            }
            let tag = record.tag();
            if !self.shared.registry.can_reload(tag) {
                continue;
            }
            let Some(loader) = self.shared.registry.loader(tag) else {
                continue;
            };
            let changed = catch_unwind(AssertUnwindSafe(|| {
                loader.has_changed(&record, self.shared.fs.as_ref())
            }))
            .unwrap_or(false);
            if changed {
                log::debug!("{} {:?} changed, marking for reload", tag, record.path());
                record.set_marked_for_reload(true);
                self.shared.queues.reload.push(record);
            }
        }
    }

    fn process_reloads(&self) {
        while let Some(record) = self.shared.queues.reload.try_pop() {
            self.reload_record(&record);
        }
    }

    /// Three-phase reload negotiation: Validate and PreReload may veto,
    /// then unload + load, then PostReload
    fn reload_record(&self, record: &Arc<AssetRecord>) {
        if !record.is_loaded() {
            record.set_marked_for_reload(false);
            return;
        }

        if !record.on_hot_reload().fire(ReloadPhase::Validate) {
            log::debug!("reload of {:?} vetoed at validate", record.path());
            self.shared.stats.record_reload_veto();
            record.set_marked_for_reload(false);
            return;
        }
        if !record.on_hot_reload().fire(ReloadPhase::PreReload) {
            log::debug!("reload of {:?} abandoned at pre-reload", record.path());
            self.shared.stats.record_reload_veto();
            record.set_marked_for_reload(false);
            return;
        }

        self.unload_local(record);
        match self.load_record(record, 0, self.shared.depth_limit) {
            Ok(()) => {
                if record.is_loaded() {
                    record.set_marked_for_reload(false);
                    self.shared.stats.record_reload();
                    record.on_hot_reload().fire(ReloadPhase::PostReload);
                    self.shared.queues.delivery.push(Delivery {
                        record: Arc::clone(record),
                        error: None,
                    });
                }
                // Context-bound records stay marked; finish_pending
                // fires PostReload once the re-finish lands
            }
            Err(error) => {
                let error = Arc::new(error);
                log::warn!("reload of {:?} failed: {}", record.path(), error);
                self.shared.stats.record_load_failure();
                record.set_marked_for_reload(false);
                self.shared.queues.delivery.push(Delivery {
                    record: Arc::clone(record),
                    error: Some(error),
                });
            }
        }
    }
}
