//! Work queues shared between requesters, the loader worker and the
//! owner thread
//!
//! Four queues move records through the system: a priority heap of
//! pending loads, two pending-unload queues (context-free, drained by the
//! worker, and context-bound, drained by the owner thread with the
//! context), a delivery queue of completed loads, and a hot-reload queue
//! of records marked by the change check. All of them accept pushes from
//! any thread; the heap and deques are mutex-guarded, the delivery and
//! reload queues are crossbeam channels.

use crate::error::AssetError;
use crate::record::AssetRecord;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One pending load, ordered by priority then FIFO within a priority
pub(crate) struct LoadRequest {
    pub priority: i32,
    seq: u64,
    pub record: Arc<AssetRecord>,
}

impl PartialEq for LoadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for LoadRequest {}

impl Ord for LoadRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first; earlier sequence breaks ties
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for LoadRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending loads
#[derive(Default)]
pub(crate) struct LoadQueue {
    heap: Mutex<BinaryHeap<LoadRequest>>,
    seq: AtomicU64,
}

impl LoadQueue {
    pub fn push(&self, priority: i32, record: Arc<AssetRecord>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(LoadRequest {
            priority,
            seq,
            record,
        });
    }

    pub fn pop(&self) -> Option<LoadRequest> {
        self.heap.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn clear(&self) {
        self.heap.lock().clear();
    }
}

/// FIFO queue of records pending unload
#[derive(Default)]
pub(crate) struct UnloadQueue {
    items: Mutex<VecDeque<Arc<AssetRecord>>>,
}

impl UnloadQueue {
    pub fn push(&self, record: Arc<AssetRecord>) {
        self.items.lock().push_back(record);
    }

    pub fn pop(&self) -> Option<Arc<AssetRecord>> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

/// A completed load ready for owner-thread delivery
pub(crate) struct Delivery {
    pub record: Arc<AssetRecord>,
    /// `None` for success; the shared failure otherwise
    pub error: Option<Arc<AssetError>>,
}

/// Multi-producer queue of completed loads, popped only by the owner
pub(crate) struct DeliveryQueue {
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl DeliveryQueue {
    pub fn push(&self, delivery: Delivery) {
        // Send on an unbounded channel only fails when the receiver is
        // gone, and we hold it for the queue's lifetime
        let _ = self.tx.send(delivery);
    }

    pub fn try_pop(&self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Queue of records marked for hot reload
pub(crate) struct ReloadQueue {
    tx: Sender<Arc<AssetRecord>>,
    rx: Receiver<Arc<AssetRecord>>,
}

impl Default for ReloadQueue {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl ReloadQueue {
    pub fn push(&self, record: Arc<AssetRecord>) {
        let _ = self.tx.send(record);
    }

    pub fn try_pop(&self) -> Option<Arc<AssetRecord>> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// The four queues, bundled for sharing
#[derive(Default)]
pub(crate) struct WorkQueues {
    pub load: LoadQueue,
    /// Unloads the worker may perform without a context
    pub unload_local: UnloadQueue,
    /// Unloads that need the owner thread's context
    pub unload_context: UnloadQueue,
    pub delivery: DeliveryQueue,
    pub reload: ReloadQueue,
}

/// Why the worker woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wakeup {
    Work,
    CheckChanges,
    Stop { drain: bool },
}

#[derive(Default)]
struct SignalState {
    stop: bool,
    drain: bool,
    check_changes: bool,
}

/// Condition the worker parks on when no work is pending
///
/// Producers call `notify_work` after pushing; the worker re-examines
/// the queues under the signal lock, so a push between its check and the
/// wait cannot be missed.
#[derive(Default)]
pub(crate) struct WorkSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl WorkSignal {
    pub fn notify_work(&self) {
        let _guard = self.state.lock();
        self.condvar.notify_all();
    }

    pub fn request_stop(&self, drain: bool) {
        let mut state = self.state.lock();
        state.stop = true;
        state.drain = drain;
        self.condvar.notify_all();
    }

    pub fn request_check_changes(&self) {
        let mut state = self.state.lock();
        state.check_changes = true;
        self.condvar.notify_all();
    }

    /// Clear stop/drain/check flags before (re)starting a worker
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.stop = false;
        state.drain = false;
        state.check_changes = false;
    }

    /// Block until there is something to do; `has_work` is evaluated
    /// under the signal lock
    pub fn wait(&self, has_work: impl Fn() -> bool) -> Wakeup {
        let mut state: MutexGuard<'_, SignalState> = self.state.lock();
        loop {
            if state.stop {
                return Wakeup::Stop { drain: state.drain };
            }
            if state.check_changes {
                state.check_changes = false;
                return Wakeup::CheckChanges;
            }
            if has_work() {
                return Wakeup::Work;
            }
            self.condvar.wait(&mut state);
        }
    }
}
