//! In-memory filesystem for testing
//!
//! Stores files in a map so loader behavior can be exercised without
//! touching the disk. Every write bumps a per-file version that is
//! reported as the modification time, which makes change detection
//! deterministic in tests.

use super::FileSystem;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::time::{Duration, SystemTime};

struct MemFile {
    data: Vec<u8>,
    version: u64,
}

/// In-memory filesystem for tests and examples
#[derive(Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<String, MemFile>>,
}

impl MemoryFileSystem {
    /// Create an empty in-memory filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a file, bumping its version
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let mut files = self.files.write();
        let path = path.into();
        let version = files.get(&path).map(|f| f.version + 1).unwrap_or(1);
        files.insert(
            path,
            MemFile {
                data: data.into(),
                version,
            },
        );
    }

    /// Remove a file, returning whether it existed
    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }

    /// Bump a file's version without changing its contents
    pub fn touch(&self, path: &str) -> bool {
        let mut files = self.files.write();
        match files.get_mut(path) {
            Some(file) => {
                file.version += 1;
                true
            }
            None => false,
        }
    }

    /// Number of files currently stored
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether the filesystem is empty
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn modified(&self, path: &str) -> io::Result<SystemTime> {
        self.files
            .read()
            .get(path)
            .map(|f| SystemTime::UNIX_EPOCH + Duration::from_secs(f.version))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }
}
