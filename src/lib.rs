//! archetype_resource - Asynchronous asset loading and caching
//!
//! # Features
//! - Background loader worker with priority scheduling
//! - Reference-counted records with get-or-create caching
//! - Cycle-safe recursive dependency resolution
//! - Context-bound finishing for GPU-resident assets
//! - Hot reload with a Validate/PreReload/PostReload negotiation
//! - Owner-thread delivery with a per-frame budget
//!
//! # Quick Start
//!
//! ```ignore
//! use archetype_resource::{AssetManager, DeliveryBudget, MemoryFileSystem, TypeTag};
//! use std::sync::Arc;
//!
//! const IMG: TypeTag = TypeTag::new("IMG");
//!
//! let manager = AssetManager::new(Arc::new(MemoryFileSystem::new()));
//! manager.register_loader(IMG, Arc::new(PngLoader::new()));
//! manager.start_worker()?;
//!
//! let handle = manager.request(IMG, "a.png", 5, |result| {
//!     println!("loaded: {:?}", result.is_ok());
//! });
//!
//! // once per frame, on the owner thread:
//! manager.deliver(DeliveryBudget::Items(16));
//! ```

// Core modules
pub mod cache;
pub mod events;
pub mod manager;
pub mod record;
pub mod registry;
pub mod vfs;

// Support modules
pub mod stats;

// Internal plumbing
mod queue;
mod worker;

// Error types
mod error;
pub use error::{AssetError, Result};

// Re-export main types from the manager façade
pub use manager::{AssetManager, DeliveryBudget, DEFAULT_DEPTH_LIMIT};

// Re-export record types
pub use record::{AssetHandle, AssetKey, AssetRecord, OpaqueData, TypeTag};

// Re-export registry types
pub use registry::{AssetLoader, DependencyList, LoadedData, LoaderFlags, LoaderRegistry};

// Re-export event types
pub use events::{LoadCallback, LoadResult, ReloadPhase, VotingEvent};

// Re-export cache and stats types
pub use cache::AssetCache;
pub use stats::{AssetStats, AssetStatsHandle};

// Re-export filesystem types
pub use vfs::{DirFileSystem, FileSystem, MemoryFileSystem};

// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
