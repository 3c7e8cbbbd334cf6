//! # Archive Mount Cache
//!
//! Extracts a ZIP archive once into `<archive_root>/<fingerprint>/` and
//! reuses the extraction until the archive changes or the mount is evicted.
//!
//! The fingerprint covers the archive's absolute path, mtime and length, so
//! a rewritten archive gets a fresh mount. A mount is valid only while its
//! `.ready` marker exists; the marker is written last and removed first, and
//! its mtime doubles as the mount's last-access time.

mod extract;

pub use extract::ExtractLimits;

use crate::error::{Result, SourceError};
use crate::maintenance::{modified, touch, tree_size, CacheStats, EvictionReport};
use crate::spec::ArchiveSourceRef;
use bridge_traits::Clock;
use core_runtime::logging::strip_path;
use extract::{extract_archive, sanitize_entry_path};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const READY_MARKER: &str = ".ready";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Contents of the ready marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct MountMarker {
    archive: String,
    size_bytes: u64,
    created_ms: i64,
}

pub struct ArchiveMountCache {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    limits: ExtractLimits,
    chunk_size: usize,
    /// Mount directories whose deletion failed; retried on every pass.
    pending_deletes: Mutex<HashSet<PathBuf>>,
    /// Held while a mount is being created or the cache is being pruned.
    mount_lock: tokio::sync::Mutex<()>,
}

impl ArchiveMountCache {
    pub fn open(root: impl Into<PathBuf>, clock: Arc<dyn Clock>, chunk_size: usize) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            clock,
            limits: ExtractLimits::default(),
            chunk_size,
            pending_deletes: Mutex::new(HashSet::new()),
            mount_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_extract_limits(mut self, limits: ExtractLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// SHA-1 of `absolute path | mtime ms | length`.
    pub fn fingerprint(archive: &Path) -> Result<String> {
        let absolute = archive.canonicalize()?;
        let meta = std::fs::metadata(&absolute)?;
        let mtime_ms = modified(&meta)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let key = format!("{}|{}|{}", absolute.display(), mtime_ms, meta.len());
        Ok(format!("{:x}", Sha1::digest(key.as_bytes())))
    }

    /// Mount directory for `archive`, extracting it on first use.
    ///
    /// Failed or cancelled extractions leave no directory behind.
    #[instrument(skip_all, fields(archive = %strip_path(&archive.to_string_lossy())))]
    pub async fn ensure_mounted(&self, archive: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            guard = self.mount_lock.lock() => guard,
        };
        self.retry_pending_deletes();

        let key = Self::fingerprint(archive)?;
        let mount = self.root.join(&key);
        let marker = mount.join(READY_MARKER);

        if marker.is_file() {
            touch(&marker, self.clock.system_time())?;
            debug!(mount = %key, "Reusing archive mount");
            return Ok(mount);
        }

        if mount.exists() {
            debug!(mount = %key, "Discarding incomplete mount");
            if !self.remove_mount(&mount) {
                return Err(SourceError::Cache(format!(
                    "incomplete mount {} could not be removed",
                    key
                )));
            }
        }
        std::fs::create_dir_all(&mount)?;

        match self.extract_into(archive, &mount, &marker, cancel).await {
            Ok(size_bytes) => {
                info!(mount = %key, size_bytes, "Archive mounted");
                Ok(mount)
            }
            Err(e) => {
                self.remove_mount(&mount);
                if e.is_cancelled() {
                    debug!("Archive extraction cancelled");
                } else {
                    warn!(error = %e, "Archive extraction failed");
                }
                Err(e)
            }
        }
    }

    async fn extract_into(
        &self,
        archive: &Path,
        mount: &Path,
        marker: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let (src, dest, cancel_token) = (archive.to_path_buf(), mount.to_path_buf(), cancel.clone());
        let (limits, chunk_size) = (self.limits, self.chunk_size);
        let summary = tokio::task::spawn_blocking(move || {
            extract_archive(&src, &dest, limits, chunk_size, &cancel_token)
        })
        .await
        .map_err(|e| SourceError::Cache(format!("extraction task failed: {}", e)))??;

        let body = serde_json::to_vec(&MountMarker {
            archive: archive.display().to_string(),
            size_bytes: summary.bytes,
            created_ms: self.clock.unix_timestamp_millis(),
        })
        .map_err(|e| SourceError::Cache(format!("failed to encode marker: {}", e)))?;
        let tmp = mount.join(".ready.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, marker).await?;
        touch(marker, self.clock.system_time())?;
        Ok(summary.bytes)
    }

    /// Regular file for `entry` inside `mount`, if it exists there.
    pub fn resolve_entry(&self, mount: &Path, entry: &str) -> Option<PathBuf> {
        let relative = sanitize_entry_path(entry)?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        let root = mount.canonicalize().ok()?;
        let candidate = root.join(relative).canonicalize().ok()?;
        if !candidate.starts_with(&root) {
            return None;
        }
        match std::fs::metadata(&candidate) {
            Ok(meta) if meta.is_file() => Some(candidate),
            _ => None,
        }
    }

    /// Mount the archive and resolve the referenced entry.
    pub async fn open_entry(
        &self,
        reference: &ArchiveSourceRef,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let mount = self.ensure_mounted(reference.archive_path(), cancel).await?;
        self.resolve_entry(&mount, reference.entry_path())
            .ok_or_else(|| {
                SourceError::InvalidLocator(format!("{} is not in the archive", reference.entry_path()))
            })
    }

    /// Drop mounts past the age cutoff, then least-recently-used mounts until
    /// both the count and byte budgets hold. `max_age_days == 0` disables the
    /// age rule.
    #[instrument(skip(self))]
    pub async fn enforce_limits(
        &self,
        max_mounts: usize,
        max_bytes: u64,
        max_age_days: u32,
    ) -> Result<EvictionReport> {
        let _guard = self.mount_lock.lock().await;
        let mut report = EvictionReport {
            deferred: self.retry_pending_deletes(),
            ..EvictionReport::default()
        };

        let mut mounts = self.scan(&mut report)?;
        mounts.sort_by_key(|m| m.accessed);

        let cutoff = (max_age_days > 0)
            .then(|| {
                self.clock
                    .system_time()
                    .checked_sub(Duration::from_secs(u64::from(max_age_days) * SECS_PER_DAY))
            })
            .flatten();

        let mut count = mounts.len();
        let mut total: u64 = mounts.iter().map(|m| m.size).sum();

        for mount in &mounts {
            let expired = cutoff.is_some_and(|cutoff| mount.accessed < cutoff);
            if !expired && count <= max_mounts && total <= max_bytes {
                continue;
            }
            if self.remove_mount(&mount.path) {
                report.record_removed(mount.size);
            } else {
                report.deferred += 1;
            }
            count -= 1;
            total -= mount.size;
        }

        if !report.is_empty() {
            info!(
                removed = report.removed,
                freed_bytes = report.freed_bytes,
                remaining = count,
                "Archive cache limits enforced"
            );
        }
        Ok(report)
    }

    /// Remove every mount.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<EvictionReport> {
        let _guard = self.mount_lock.lock().await;
        let mut report = EvictionReport {
            deferred: self.retry_pending_deletes(),
            ..EvictionReport::default()
        };

        for mount in self.scan(&mut report)? {
            if self.remove_mount(&mount.path) {
                report.record_removed(mount.size);
            } else {
                report.deferred += 1;
            }
        }
        info!(removed = report.removed, "Archive cache cleared");
        Ok(report)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.join(READY_MARKER).is_file() {
                stats.entries += 1;
                stats.total_bytes += tree_size(&path);
            }
        }
        Ok(stats)
    }

    /// Ready mounts; directories without a marker are removed on the way.
    fn scan(&self, report: &mut EvictionReport) -> Result<Vec<Mount>> {
        let mut mounts = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            match std::fs::metadata(path.join(READY_MARKER)) {
                Ok(meta) if meta.is_file() => mounts.push(Mount {
                    size: tree_size(&path),
                    accessed: modified(&meta),
                    path,
                }),
                _ => {
                    let size = tree_size(&path);
                    if self.remove_mount(&path) {
                        debug!(mount = %entry.file_name().to_string_lossy(), "Removed incomplete mount");
                        report.freed_bytes += size;
                    }
                }
            }
        }
        Ok(mounts)
    }

    /// Delete a mount, marker first. Failures are queued for a later retry.
    fn remove_mount(&self, mount: &Path) -> bool {
        let _ = std::fs::remove_file(mount.join(READY_MARKER));
        match std::fs::remove_dir_all(mount) {
            Ok(()) => {
                self.pending_deletes.lock().remove(mount);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.pending_deletes.lock().remove(mount);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete archive mount, will retry");
                self.pending_deletes.lock().insert(mount.to_path_buf());
                false
            }
        }
    }

    /// Returns how many deletions are still pending.
    fn retry_pending_deletes(&self) -> usize {
        let pending: Vec<PathBuf> = self.pending_deletes.lock().iter().cloned().collect();
        pending
            .into_iter()
            .filter(|path| !self.remove_mount(path))
            .count()
    }
}

impl std::fmt::Debug for ArchiveMountCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveMountCache")
            .field("root", &self.root)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

struct Mount {
    path: PathBuf,
    size: u64,
    accessed: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;
    use chrono::TimeZone;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn mount_dirs(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[tokio::test]
    async fn test_mount_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("album.zip");
        write_zip(&archive, &[("01.mp3", b"abc")]);
        let cache = ArchiveMountCache::open(dir.path().join("mounts"), clock(), 1024).unwrap();
        let cancel = CancellationToken::new();

        let first = cache.ensure_mounted(&archive, &cancel).await.unwrap();
        std::fs::write(first.join("sentinel"), b"kept").unwrap();
        let second = cache.ensure_mounted(&archive, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert!(second.join("sentinel").exists());
        assert!(second.join(READY_MARKER).is_file());
        assert!(cache.resolve_entry(&second, "01.mp3").is_some());
        assert!(cache.resolve_entry(&second, "../album.zip").is_none());
        assert!(cache.resolve_entry(&second, "missing.mp3").is_none());
    }

    #[tokio::test]
    async fn test_colons_in_entry_names_are_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("opera.zip");
        write_zip(
            &archive,
            &[("Act 1: Overture.mp3", b"overture"), ("Act 2/Aria: Nessun dorma.mp3", b"aria")],
        );
        let cache = ArchiveMountCache::open(dir.path().join("mounts"), clock(), 1024).unwrap();

        let mount = cache
            .ensure_mounted(&archive, &CancellationToken::new())
            .await
            .unwrap();
        let overture = cache.resolve_entry(&mount, "Act 1: Overture.mp3").unwrap();
        assert_eq!(std::fs::read(overture).unwrap(), b"overture");
        assert!(cache
            .resolve_entry(&mount, "Act 2/Aria: Nessun dorma.mp3")
            .is_some());
    }

    #[tokio::test]
    async fn test_undeletable_leftover_is_deferred_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mounts");
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("t.mp3", b"track")]);
        let cache = ArchiveMountCache::open(&root, clock(), 1024).unwrap();
        let cancel = CancellationToken::new();

        // A plain file where the mount directory belongs cannot be removed as a tree.
        let leftover = root.join(ArchiveMountCache::fingerprint(&archive).unwrap());
        std::fs::write(&leftover, b"locked").unwrap();

        let err = cache.ensure_mounted(&archive, &cancel).await.err().unwrap();
        assert!(matches!(err, SourceError::Cache(_)), "{:?}", err);
        assert!(cache.pending_deletes.lock().contains(&leftover));

        // Once the leftover goes away, the queued retry clears and the mount succeeds.
        std::fs::remove_file(&leftover).unwrap();
        let mount = cache.ensure_mounted(&archive, &cancel).await.unwrap();
        assert!(mount.join(READY_MARKER).is_file());
        assert!(cache.pending_deletes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_extraction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("big.zip");
        write_zip(&archive, &[("a", &[1u8; 64]), ("b", &[1u8; 64])]);
        let root = dir.path().join("mounts");
        let cache = ArchiveMountCache::open(&root, clock(), 16)
            .unwrap()
            .with_extract_limits(ExtractLimits {
                max_total_bytes: 100,
                ..ExtractLimits::default()
            });

        let err = cache
            .ensure_mounted(&archive, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::ArchiveTooLarge { .. }));
        assert_eq!(mount_dirs(&root), 0);
    }

    #[tokio::test]
    async fn test_enforce_limits_age_then_lru() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let cache = ArchiveMountCache::open(dir.path().join("mounts"), clock.clone(), 1024).unwrap();
        let cancel = CancellationToken::new();

        let mut mounts = Vec::new();
        for name in ["a.zip", "b.zip", "c.zip"] {
            let archive = dir.path().join(name);
            write_zip(&archive, &[("t.mp3", b"0123456789")]);
            mounts.push(cache.ensure_mounted(&archive, &cancel).await.unwrap());
            clock.advance_days(10);
        }

        // a is 30 days old, b 20, c 10
        let report = cache.enforce_limits(16, u64::MAX, 25).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!mounts[0].exists());

        let report = cache.enforce_limits(1, u64::MAX, 0).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!mounts[1].exists());
        assert!(mounts[2].exists());

        let again = cache.enforce_limits(1, u64::MAX, 0).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(cache.stats().unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_incomplete_mounts_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mounts");
        let cache = ArchiveMountCache::open(&root, clock(), 1024).unwrap();
        std::fs::create_dir_all(root.join("deadbeef/partial")).unwrap();
        std::fs::write(root.join("deadbeef/partial/x"), b"x").unwrap();

        cache.enforce_limits(16, u64::MAX, 0).await.unwrap();
        assert_eq!(mount_dirs(&root), 0);

        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("x", b"x")]);
        cache
            .ensure_mounted(&archive, &CancellationToken::new())
            .await
            .unwrap();
        let report = cache.clear_all().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(mount_dirs(&root), 0);
    }
}
