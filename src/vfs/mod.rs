//! Virtual filesystem abstraction for loader callbacks
//!
//! The asset system never interprets file contents itself; loaders receive
//! a [`FileSystem`] handle and read whatever bytes they need through it.

pub mod dir;
pub mod memory;

use std::io;
use std::time::SystemTime;

/// Read-only filesystem collaborator used by loader callbacks
///
/// Implementations must be safe to call from the loader worker thread
/// while other threads keep issuing requests.
pub trait FileSystem: Send + Sync {
    /// Read the whole file at `path`
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Last modification time of `path`, for change detection
    fn modified(&self, path: &str) -> io::Result<SystemTime>;

    /// Whether `path` currently exists
    fn exists(&self, path: &str) -> bool;
}

// Re-export implementations
pub use dir::DirFileSystem;
pub use memory::MemoryFileSystem;
