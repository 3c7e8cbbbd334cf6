//! Default cache locations on desktop platforms.

use std::path::PathBuf;

/// Archive-mount and remote-download cache roots under the user cache dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoots {
    pub archive_root: PathBuf,
    pub remote_root: PathBuf,
}

/// Resolve the default cache roots for `app_name`.
///
/// Falls back to the system temp directory when the platform reports no
/// per-user cache directory.
pub fn default_cache_roots(app_name: &str) -> CacheRoots {
    let base = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(app_name);
    CacheRoots {
        archive_root: base.join("archive_mounts"),
        remote_root: base.join("remote_tracks"),
    }
}
