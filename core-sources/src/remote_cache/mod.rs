//! # Remote Download Cache
//!
//! Content-addressed local copies of HTTP and SMB files.
//!
//! ## Layout
//!
//! ```text
//! <remote_root>/
//!   index.json                  file name -> source identity
//!   <sha1(source_id)>           committed file, no suggested name
//!   <sha1(source_id)>-<name>    committed file with a sanitized name
//!   <sha1(source_id)>.part      transfer in progress
//! ```
//!
//! A file is valid once it has been renamed out of `.part`. The file's mtime
//! is its last-access time: hits touch it and eviction removes the oldest
//! first, skipping protected paths and transfers in flight.

mod download;
mod http;
mod index;
mod progress;
mod smb;

pub use download::RemoteDownloader;
pub use http::content_disposition_filename;
pub use progress::{ignore_progress, LoadEvent, LoadObserver};

use crate::error::{Result, SourceError};
use crate::maintenance::{modified, touch, CacheStats, EvictionReport};
use bridge_traits::Clock;
use index::{CacheIndex, INDEX_FILE};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

pub(crate) const PART_SUFFIX: &str = ".part";
const MAX_NAME_CHARS: usize = 96;

/// A file available in the remote cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub source_id: String,
    pub size_bytes: u64,
    /// `true` when no transfer was needed.
    pub from_cache: bool,
}

/// Final name and temp path of one transfer.
///
/// The final name may change once response headers suggest a file name.
#[derive(Debug, Clone)]
pub(crate) struct DownloadTarget {
    pub source_id: String,
    pub file_name: String,
    pub temp: PathBuf,
}

impl DownloadTarget {
    fn new(cache: &RemoteCache, source_id: &str, suggested: Option<&str>) -> Self {
        let stem = RemoteCache::file_stem(source_id);
        Self {
            source_id: source_id.to_string(),
            file_name: RemoteCache::file_name_for(source_id, suggested),
            temp: cache.root.join(format!("{}{}", stem, PART_SUFFIX)),
        }
    }

    /// Recompute the final name; returns `true` when it changed.
    pub(crate) fn retarget(&mut self, suggested: &str) -> bool {
        let name = RemoteCache::file_name_for(&self.source_id, Some(suggested));
        if name == self.file_name {
            return false;
        }
        self.file_name = name;
        true
    }
}

/// Remote download cache store.
pub struct RemoteCache {
    root: PathBuf,
    index: CacheIndex,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<PathBuf>>,
    source_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RemoteCache {
    /// Open (creating if needed) the cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index = CacheIndex::load(&root);
        Ok(Self {
            root,
            index,
            clock,
            in_flight: Mutex::new(HashSet::new()),
            source_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// SHA-1 hex of the source identity.
    pub fn file_stem(source_id: &str) -> String {
        format!("{:x}", Sha1::digest(source_id.as_bytes()))
    }

    /// Cache file name for `source_id`, suffixed with a sanitized suggestion.
    pub fn file_name_for(source_id: &str, suggested: Option<&str>) -> String {
        let stem = Self::file_stem(source_id);
        match suggested.and_then(sanitize_file_name) {
            Some(name) => format!("{}-{}", stem, name),
            None => stem,
        }
    }

    /// Cached file for `source_id`, touching it on a hit.
    ///
    /// Index entries pointing at missing files are dropped; a file carrying
    /// the identity's hash prefix but missing from the index is re-indexed.
    pub fn lookup(&self, source_id: &str) -> Result<Option<CachedFile>> {
        if let Some(name) = self.index.file_for(source_id) {
            if let Some(hit) = self.hit_by_name(source_id, &name)? {
                return Ok(Some(hit));
            }
            debug!(file = %name, "Index points at a missing file, dropping entry");
            self.index.remove(&name)?;
        }

        let stem = Self::file_stem(source_id);
        let prefixed = format!("{}-", stem);
        for entry in std::fs::read_dir(&self.root)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name == stem || (name.starts_with(&prefixed) && !name.ends_with(PART_SUFFIX)) {
                if let Some(hit) = self.hit_by_name(source_id, &name)? {
                    debug!(file = %name, "Re-indexed cache file found by hash prefix");
                    return Ok(Some(hit));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn hit_by_name(&self, source_id: &str, file_name: &str) -> Result<Option<CachedFile>> {
        let path = self.root.join(file_name);
        let meta = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta,
            _ => return Ok(None),
        };
        touch(&path, self.clock.system_time())?;
        if self.index.source_for(file_name).as_deref() != Some(source_id) {
            self.index.insert(file_name, source_id)?;
        }
        Ok(Some(CachedFile {
            path,
            source_id: source_id.to_string(),
            size_bytes: meta.len(),
            from_cache: true,
        }))
    }

    pub(crate) fn target(&self, source_id: &str, suggested: Option<&str>) -> DownloadTarget {
        DownloadTarget::new(self, source_id, suggested)
    }

    /// Serialize transfers of one source identity.
    pub(crate) async fn lock_source(&self, source_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.source_locks.lock();
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(source_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub(crate) fn mark_in_flight(&self, temp: &Path) {
        self.in_flight.lock().insert(temp.to_path_buf());
    }

    pub(crate) fn clear_in_flight(&self, temp: &Path) {
        self.in_flight.lock().remove(temp);
    }

    /// Promote a finished `.part` file to its final name.
    pub(crate) async fn commit(&self, target: &DownloadTarget) -> Result<CachedFile> {
        let dest = self.root.join(&target.file_name);
        if let Err(e) = tokio::fs::rename(&target.temp, &dest).await {
            debug!(error = %e, "Rename into cache failed, copying instead");
            if let Err(copy_err) = tokio::fs::copy(&target.temp, &dest).await {
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(SourceError::Cache(format!(
                    "failed to commit download: {}",
                    copy_err
                )));
            }
            let _ = tokio::fs::remove_file(&target.temp).await;
        }

        touch(&dest, self.clock.system_time())?;
        self.index.insert(&target.file_name, &target.source_id)?;
        let size_bytes = tokio::fs::metadata(&dest).await?.len();

        info!(file = %target.file_name, size_bytes, "Download committed to cache");
        Ok(CachedFile {
            path: dest,
            source_id: target.source_id.clone(),
            size_bytes,
            from_cache: false,
        })
    }

    /// Evict least-recently-used files until both budgets hold.
    ///
    /// Protected paths and transfers in flight are never removed. Stale
    /// `.part` files are deleted. Files that fail to delete are counted as
    /// deferred and retried on the next pass.
    #[instrument(skip(self, protected))]
    pub fn enforce_limits(
        &self,
        max_tracks: usize,
        max_bytes: u64,
        protected: &HashSet<PathBuf>,
    ) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        let mut files = self.scan(protected, &mut report)?;
        files.sort_by_key(|f| f.accessed);

        let mut count = files.len();
        let mut total: u64 = files.iter().map(|f| f.size).sum();

        for file in &files {
            if count <= max_tracks && total <= max_bytes {
                break;
            }
            if protected.contains(&file.path) {
                continue;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    if let Err(e) = self.index.remove(&file.name) {
                        warn!(error = %e, "Failed to update cache index");
                    }
                    count -= 1;
                    total -= file.size;
                    report.record_removed(file.size);
                }
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Failed to evict cache file");
                    report.deferred += 1;
                }
            }
        }

        if !report.is_empty() {
            info!(
                removed = report.removed,
                freed_bytes = report.freed_bytes,
                remaining = count,
                "Remote cache limits enforced"
            );
        }
        Ok(report)
    }

    /// Remove every cached file except protected ones.
    #[instrument(skip(self, protected))]
    pub fn clear_all(&self, protected: &HashSet<PathBuf>) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        for file in self.scan(protected, &mut report)? {
            if protected.contains(&file.path) {
                continue;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => report.record_removed(file.size),
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Failed to remove cache file");
                    report.deferred += 1;
                }
            }
        }

        let kept: HashSet<String> = protected
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        if kept.is_empty() {
            self.index.clear()?;
        } else {
            self.index.retain(|name| kept.contains(name))?;
        }

        info!(removed = report.removed, "Remote cache cleared");
        Ok(report)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_bookkeeping(&name) || name.ends_with(PART_SUFFIX) {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                stats.entries += 1;
                stats.total_bytes += meta.len();
            }
        }
        Ok(stats)
    }

    /// Committed files; removes stale temp files and prunes dead index rows.
    fn scan(
        &self,
        protected: &HashSet<PathBuf>,
        report: &mut EvictionReport,
    ) -> Result<Vec<ScannedFile>> {
        let in_flight = self.in_flight.lock().clone();
        let mut files = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_bookkeeping(&name) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let path = entry.path();

            if name.ends_with(PART_SUFFIX) {
                if in_flight.contains(&path) || protected.contains(&path) {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(file = %name, "Removed stale partial download");
                        report.freed_bytes += meta.len();
                    }
                    Err(e) => warn!(file = %name, error = %e, "Failed to remove stale partial"),
                }
                continue;
            }

            files.push(ScannedFile {
                accessed: modified(&meta),
                size: meta.len(),
                path,
                name,
            });
        }

        let present: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        self.index.retain(|name| present.contains(name))?;
        Ok(files)
    }
}

impl std::fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

struct ScannedFile {
    path: PathBuf,
    name: String,
    size: u64,
    accessed: std::time::SystemTime,
}

fn is_bookkeeping(name: &str) -> bool {
    name == INDEX_FILE || name.ends_with(".json.tmp")
}

/// Reduce a server-suggested name to a safe single path component.
fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() => c,
            '.' | '-' | '_' => c,
            _ => '_',
        })
        .take(MAX_NAME_CHARS)
        .collect();
    let mut cleaned = cleaned.trim_matches(['.', '_']).to_string();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.ends_with(PART_SUFFIX) {
        cleaned.push('_');
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;
    use chrono::TimeZone;
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    async fn put(cache: &RemoteCache, source_id: &str, bytes: usize) -> CachedFile {
        let target = cache.target(source_id, None);
        tokio::fs::write(&target.temp, vec![7u8; bytes]).await.unwrap();
        cache.commit(&target).await.unwrap()
    }

    #[test]
    fn test_file_names() {
        let stem = RemoteCache::file_stem("https://host/a.mp3");
        assert_eq!(stem.len(), 40);
        assert_eq!(
            RemoteCache::file_name_for("https://host/a.mp3", Some("../My Song?.mp3")),
            format!("{}-My_Song_.mp3", stem)
        );
        assert_eq!(RemoteCache::file_name_for("https://host/a.mp3", Some("..")), stem);
        assert_eq!(
            sanitize_file_name("x.part").as_deref(),
            Some("x.part_")
        );
    }

    #[tokio::test]
    async fn test_lookup_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RemoteCache::open(dir.path(), clock()).unwrap();
        let file = put(&cache, "https://host/a.mp3", 10).await;

        std::fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();
        let reopened = RemoteCache::open(dir.path(), clock()).unwrap();
        let hit = reopened.lookup("https://host/a.mp3").unwrap().unwrap();
        assert_eq!(hit.path, file.path);
        assert!(hit.from_cache);

        std::fs::remove_file(&file.path).unwrap();
        assert!(reopened.lookup("https://host/a.mp3").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enforce_limits_lru_and_protected() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let cache = RemoteCache::open(dir.path(), clock.clone()).unwrap();

        let a = put(&cache, "https://host/a", 100).await;
        clock.advance(Duration::from_secs(60));
        let b = put(&cache, "https://host/b", 100).await;
        clock.advance(Duration::from_secs(60));
        let c = put(&cache, "https://host/c", 100).await;

        let protected: HashSet<PathBuf> = [a.path.clone()].into_iter().collect();
        let report = cache.enforce_limits(1, u64::MAX, &protected).unwrap();

        assert_eq!(report.removed, 1);
        assert!(a.path.exists());
        assert!(!b.path.exists());
        assert!(c.path.exists());

        let again = cache.enforce_limits(1, u64::MAX, &protected).unwrap();
        assert!(again.is_empty());
        assert!(a.path.exists() && c.path.exists());
    }

    #[tokio::test]
    async fn test_stale_part_removed_unless_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RemoteCache::open(dir.path(), clock()).unwrap();

        let stale = cache.target("https://host/stale", None).temp;
        let live = cache.target("https://host/live", None).temp;
        std::fs::write(&stale, b"x").unwrap();
        std::fs::write(&live, b"y").unwrap();
        cache.mark_in_flight(&live);

        cache.enforce_limits(10, u64::MAX, &HashSet::new()).unwrap();
        assert!(!stale.exists());
        assert!(live.exists());
    }

    #[tokio::test]
    async fn test_clear_all_keeps_protected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RemoteCache::open(dir.path(), clock()).unwrap();
        let a = put(&cache, "https://host/a", 10).await;
        let b = put(&cache, "https://host/b", 20).await;

        let protected: HashSet<PathBuf> = [b.path.clone()].into_iter().collect();
        let report = cache.clear_all(&protected).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.freed_bytes, 10);
        assert!(!a.path.exists());
        assert!(cache.lookup("https://host/b").unwrap().is_some());
        assert_eq!(
            cache.stats().unwrap(),
            CacheStats {
                entries: 1,
                total_bytes: 20
            }
        );
    }
}
