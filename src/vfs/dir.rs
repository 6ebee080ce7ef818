//! Directory-backed filesystem implementation

use super::FileSystem;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Filesystem rooted at a directory on disk
///
/// Asset paths are resolved relative to the root; leading slashes are
/// stripped so `"textures/a.png"` and `"/textures/a.png"` name the same file.
pub struct DirFileSystem {
    root: PathBuf,
}

impl DirFileSystem {
    /// Create a filesystem rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory this filesystem resolves against
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl FileSystem for DirFileSystem {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }

    fn modified(&self, path: &str) -> io::Result<SystemTime> {
        std::fs::metadata(self.resolve(path))?.modified()
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }
}
