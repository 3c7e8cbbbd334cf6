//! Bookkeeping shared by both cache domains.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Entry count and on-disk size of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Outcome of an eviction or clear pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub removed: usize,
    pub freed_bytes: u64,
    /// Entries that could not be deleted now and will be retried.
    pub deferred: usize,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.removed == 0 && self.deferred == 0
    }

    pub(crate) fn record_removed(&mut self, bytes: u64) {
        self.removed += 1;
        self.freed_bytes += bytes;
    }
}

/// Set a file's mtime, used as the last-access time for LRU ordering.
pub(crate) fn touch(path: &Path, at: SystemTime) -> io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_modified(at)
}

pub(crate) fn modified(meta: &std::fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(UNIX_EPOCH)
}

/// Total size of regular files below `path`.
pub(crate) fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_touch_sets_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();

        let at = UNIX_EPOCH + Duration::from_secs(1_000_000);
        touch(&file, at).unwrap();
        assert_eq!(modified(&std::fs::metadata(&file).unwrap()), at);
        assert_eq!(std::fs::read(&file).unwrap(), b"abc");
    }

    #[test]
    fn test_tree_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/one"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("a/b/two"), vec![0u8; 5]).unwrap();
        assert_eq!(tree_size(dir.path()), 15);
    }
}
