//! Asset records and reference-counted handles
//!
//! An [`AssetRecord`] is the cache entry tracking one asset: identity,
//! loaded data, metadata, queue flags, dependencies and notification
//! channels. Consumers never hold a bare record; they hold an
//! [`AssetHandle`], a smart pointer whose clone/drop keeps the record's
//! logical reference count in step. The cache itself owns the baseline
//! reference, so the count never drops below one.

use crate::events::{NotificationChannel, VotingEvent};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Opaque loaded payload owned by a record
pub type OpaqueData = Box<dyn Any + Send + Sync>;

/// Short static tag identifying an asset type, e.g. `"IMG"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(&'static str);

impl TypeTag {
    pub const fn new(tag: &'static str) -> Self {
        Self(tag)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Cache key: an asset's immutable `(type, path)` identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey {
    pub tag: TypeTag,
    pub path: Arc<str>,
}

impl AssetKey {
    pub fn new(tag: TypeTag, path: impl Into<Arc<str>>) -> Self {
        Self {
            tag,
            path: path.into(),
        }
    }
}

/// One dependency edge: the keep-alive handle plus the voter the
/// dependent subscribed on the dependency's reload channel
pub(crate) struct DependencyEdge {
    pub handle: AssetHandle,
    pub voter: u64,
}

impl DependencyEdge {
    /// Drop the voter subscription; call before releasing the handle
    pub fn release(self) {
        self.handle.on_hot_reload().unsubscribe(self.voter);
    }
}

/// Mutable per-record state, guarded by one mutex
pub(crate) struct RecordState {
    /// Loaded payload; `Some` whenever `loaded` is true
    pub data: Option<OpaqueData>,
    /// Decoded-but-unfinished payload for context-bound types
    pub staged: Option<OpaqueData>,
    /// Loader-defined auxiliary data (checksum, mtime, length, ...)
    pub metadata: Option<OpaqueData>,
    pub loaded: bool,
    pub requires_finish: bool,
    pub marked_for_reload: bool,
    /// Keep-alive edges to the records this one depends on
    pub dependencies: SmallVec<[DependencyEdge; 4]>,
}

/// State holder for one asset
///
/// Created on the first request for an unseen `(type, path)` and kept in
/// the cache until full teardown; unloading returns a record to the
/// unloaded state but keeps its entry.
pub struct AssetRecord {
    tag: TypeTag,
    path: Arc<str>,
    ref_count: AtomicUsize,
    pub(crate) queued_to_load: AtomicBool,
    pub(crate) queued_to_unload: AtomicBool,
    pub(crate) state: Mutex<RecordState>,
    pub(crate) on_loaded: NotificationChannel,
    on_hot_reload: VotingEvent,
}

impl AssetRecord {
    /// Create a fresh unloaded record; the count starts at one for the
    /// cache's baseline reference
    pub(crate) fn new(tag: TypeTag, path: Arc<str>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            path,
            ref_count: AtomicUsize::new(1),
            queued_to_load: AtomicBool::new(false),
            queued_to_unload: AtomicBool::new(false),
            state: Mutex::new(RecordState {
                data: None,
                staged: None,
                metadata: None,
                loaded: false,
                requires_finish: false,
                marked_for_reload: false,
                dependencies: SmallVec::new(),
            }),
            on_loaded: NotificationChannel::new(),
            on_hot_reload: VotingEvent::new(),
        })
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key(&self) -> AssetKey {
        AssetKey::new(self.tag, Arc::clone(&self.path))
    }

    /// Logical reference count, including the cache's baseline of one
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Relaxed)
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    /// Whether a context-bound finish step is still outstanding
    pub fn needs_finish(&self) -> bool {
        self.state.lock().staged.is_some()
    }

    pub fn is_marked_for_reload(&self) -> bool {
        self.state.lock().marked_for_reload
    }

    pub fn is_queued_to_load(&self) -> bool {
        self.queued_to_load.load(Ordering::Acquire)
    }

    pub fn is_queued_to_unload(&self) -> bool {
        self.queued_to_unload.load(Ordering::Acquire)
    }

    /// Number of dependencies this record keeps alive
    pub fn dependency_count(&self) -> usize {
        self.state.lock().dependencies.len()
    }

    /// Borrow the loaded payload as `T`
    ///
    /// Returns `None` when the record is not loaded or the payload is of
    /// a different type.
    pub fn with_data<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock();
        state
            .data
            .as_ref()
            .and_then(|data| data.downcast_ref::<T>())
            .map(f)
    }

    /// Borrow the loader-defined metadata as `T`
    pub fn with_metadata<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock();
        state
            .metadata
            .as_ref()
            .and_then(|meta| meta.downcast_ref::<T>())
            .map(f)
    }

    /// Voting channel fired during hot-reload negotiation
    ///
    /// Dependents of this record are subscribed automatically; consumers
    /// holding derived state may subscribe their own voter.
    pub fn on_hot_reload(&self) -> &VotingEvent {
        &self.on_hot_reload
    }

    pub(crate) fn add_ref(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn remove_ref(&self) -> usize {
        let previous = self.ref_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 1, "record reference count dropped below one");
        previous - 1
    }

    pub(crate) fn set_marked_for_reload(&self, marked: bool) {
        self.state.lock().marked_for_reload = marked;
    }
}

impl fmt::Debug for AssetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRecord")
            .field("tag", &self.tag)
            .field("path", &self.path)
            .field("ref_count", &self.ref_count())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Reference-counted handle to an asset record
///
/// Cloning increments and dropping decrements the record's logical
/// count, so unload eligibility (`ref_count == 1`) falls out of ordinary
/// ownership instead of manual add/remove discipline.
pub struct AssetHandle {
    record: Arc<AssetRecord>,
}

impl AssetHandle {
    /// Wrap a record, taking a logical reference on it
    pub(crate) fn adopt(record: Arc<AssetRecord>) -> Self {
        record.add_ref();
        Self { record }
    }

    pub(crate) fn record(&self) -> &Arc<AssetRecord> {
        &self.record
    }
}

impl Deref for AssetHandle {
    type Target = AssetRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

impl Clone for AssetHandle {
    fn clone(&self) -> Self {
        Self::adopt(Arc::clone(&self.record))
    }
}

impl Drop for AssetHandle {
    fn drop(&mut self) {
        self.record.remove_ref();
    }
}

impl fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AssetHandle").field(&*self.record).finish()
    }
}
