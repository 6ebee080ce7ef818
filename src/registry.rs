//! Loader registration and per-type operation flags
//!
//! Each asset type registers one [`AssetLoader`] implementation. Only
//! `load` and `unload` are mandatory; the optional callbacks degrade
//! gracefully when absent (no dependencies, no hot-reload support, no
//! context-bound finish). Type erasure happens once at registration: the
//! registry stores `Arc<dyn AssetLoader>` entries keyed by tag.

use crate::error::Result;
use crate::events::ReloadPhase;
use crate::record::{AssetRecord, OpaqueData, TypeTag};
use crate::vfs::FileSystem;
use bitflags::bitflags;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

bitflags! {
    /// Per-type enable mask for loader operations
    ///
    /// Disabling `LOAD` implicitly disables `RELOAD`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoaderFlags: u8 {
        const LOAD = 1 << 0;
        const UNLOAD = 1 << 1;
        const RELOAD = 1 << 2;
    }
}

impl Default for LoaderFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Payload produced by a successful `load` callback
pub struct LoadedData {
    pub data: OpaqueData,
    pub metadata: Option<OpaqueData>,
}

impl LoadedData {
    pub fn new(data: impl Any + Send + Sync) -> Self {
        Self {
            data: Box::new(data),
            metadata: None,
        }
    }

    /// Attach loader-defined metadata used later for change detection
    pub fn with_metadata(mut self, metadata: impl Any + Send + Sync) -> Self {
        self.metadata = Some(Box::new(metadata));
        self
    }
}

/// Dependencies reported by a loader before its own `load` runs
pub struct DependencyList {
    /// `(type, path)` pairs to resolve through the cache
    pub assets: Vec<(TypeTag, String)>,
    /// When true, every listed dependency must be fully loaded before
    /// the dependent's own load completes; when false, dependencies load
    /// independently at the dependent's priority
    pub blocking: bool,
}

impl DependencyList {
    pub fn none() -> Self {
        Self {
            assets: Vec::new(),
            blocking: true,
        }
    }

    pub fn blocking(assets: Vec<(TypeTag, String)>) -> Self {
        Self {
            assets,
            blocking: true,
        }
    }

    pub fn deferred(assets: Vec<(TypeTag, String)>) -> Self {
        Self {
            assets,
            blocking: false,
        }
    }
}

impl Default for DependencyList {
    fn default() -> Self {
        Self::none()
    }
}

/// Callback set supplied per asset type
///
/// `load`, `unload` and `has_changed` run on the loader worker thread
/// only; `finish` and `unload_finished` run on the owner thread with the
/// opaque context. Implementations must therefore be `Send + Sync` but
/// never see concurrent calls for the same record.
pub trait AssetLoader: Send + Sync {
    /// Decode the asset at `record.path()` into its in-memory form
    fn load(&self, record: &AssetRecord, fs: &dyn FileSystem) -> Result<LoadedData>;

    /// Release a previously loaded payload
    fn unload(&self, record: &AssetRecord, data: OpaqueData, fs: &dyn FileSystem);

    /// Whether this type needs a context-bound finish step before the
    /// record becomes usable
    fn requires_finish(&self) -> bool {
        false
    }

    /// Materialize the staged payload into the owner-thread context,
    /// returning the finished payload
    fn finish(
        &self,
        _record: &AssetRecord,
        staged: OpaqueData,
        _context: &mut dyn Any,
    ) -> Result<OpaqueData> {
        Ok(staged)
    }

    /// Release a finished payload that holds context-bound resources;
    /// runs on the owner thread
    fn unload_finished(&self, _record: &AssetRecord, data: OpaqueData, _context: &mut dyn Any) {
        drop(data);
    }

    /// Whether the backing file changed since the record was loaded
    fn has_changed(&self, _record: &AssetRecord, _fs: &dyn FileSystem) -> bool {
        false
    }

    /// Assets this record needs, resolved before its own `load` runs
    fn dependencies(&self, _record: &AssetRecord) -> DependencyList {
        DependencyList::none()
    }

    /// Vote on a dependency's hot reload on behalf of `record`
    fn validate_reload(
        &self,
        _record: &AssetRecord,
        _dependency: &AssetRecord,
        _phase: ReloadPhase,
    ) -> bool {
        true
    }
}

pub(crate) struct LoaderEntry {
    pub loader: Arc<dyn AssetLoader>,
    pub flags: LoaderFlags,
}

/// Maps a type tag to its loader callbacks and operation flags
#[derive(Default)]
pub struct LoaderRegistry {
    entries: RwLock<HashMap<TypeTag, LoaderEntry>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the loader for a type with all operations
    /// enabled
    pub fn register(&self, tag: TypeTag, loader: Arc<dyn AssetLoader>) {
        self.register_with_flags(tag, loader, LoaderFlags::default());
    }

    /// Register (or replace) the loader for a type with an explicit flag
    /// mask
    pub fn register_with_flags(
        &self,
        tag: TypeTag,
        loader: Arc<dyn AssetLoader>,
        flags: LoaderFlags,
    ) {
        self.entries
            .write()
            .insert(tag, LoaderEntry { loader, flags });
    }

    pub fn has_loader(&self, tag: TypeTag) -> bool {
        self.entries.read().contains_key(&tag)
    }

    /// Replace the flags for an already-registered type; returns false
    /// when no loader is registered for `tag`
    pub fn set_flags(&self, tag: TypeTag, flags: LoaderFlags) -> bool {
        match self.entries.write().get_mut(&tag) {
            Some(entry) => {
                entry.flags = flags;
                true
            }
            None => false,
        }
    }

    pub fn flags(&self, tag: TypeTag) -> Option<LoaderFlags> {
        self.entries.read().get(&tag).map(|e| e.flags)
    }

    pub(crate) fn loader(&self, tag: TypeTag) -> Option<Arc<dyn AssetLoader>> {
        self.entries.read().get(&tag).map(|e| Arc::clone(&e.loader))
    }

    pub(crate) fn can_load(&self, tag: TypeTag) -> bool {
        self.flags(tag)
            .is_some_and(|f| f.contains(LoaderFlags::LOAD))
    }

    pub(crate) fn can_unload(&self, tag: TypeTag) -> bool {
        self.flags(tag)
            .is_some_and(|f| f.contains(LoaderFlags::UNLOAD))
    }

    /// Reload requires both RELOAD and LOAD; disabling LOAD disables
    /// reload implicitly
    pub(crate) fn can_reload(&self, tag: TypeTag) -> bool {
        self.flags(tag)
            .is_some_and(|f| f.contains(LoaderFlags::RELOAD | LoaderFlags::LOAD))
    }
}
