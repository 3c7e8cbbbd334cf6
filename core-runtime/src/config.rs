//! # Source Cache Configuration
//!
//! Budgets and policy toggles for the archive-mount and remote-download
//! caches, plus the network timeouts used while resolving sources.
//!
//! ## Overview
//!
//! Configuration is assembled with [`SourceCacheConfig::builder`] and checked
//! by [`SourceCacheConfig::validate`]. Hosts that keep user preferences in a
//! [`SettingsStore`] can overlay them with [`SourceCacheConfig::load`].
//!
//! When the `desktop-shims` feature is enabled, missing cache roots default
//! to the per-user cache directory.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SourceCacheConfig;
//!
//! let config = SourceCacheConfig::builder()
//!     .archive_root("/var/cache/mpc/archive_mounts")
//!     .remote_root("/var/cache/mpc/remote_tracks")
//!     .remote_max_tracks(50)
//!     .build()?;
//! ```
//!
//! ## Settings keys
//!
//! | Key | Type |
//! |-----|------|
//! | `archive_cache.max_mounts` | i64 |
//! | `archive_cache.max_bytes` | i64 |
//! | `archive_cache.max_age_days` | i64 |
//! | `archive_cache.clear_on_launch` | bool |
//! | `remote_cache.max_tracks` | i64 |
//! | `remote_cache.max_bytes` | i64 |
//! | `remote_cache.clear_on_launch` | bool |
//! | `sources.force_cache` | bool |

use crate::error::{Error, Result};
use bridge_traits::SettingsStore;
use std::path::PathBuf;
use std::time::Duration;

pub const KEY_ARCHIVE_MAX_MOUNTS: &str = "archive_cache.max_mounts";
pub const KEY_ARCHIVE_MAX_BYTES: &str = "archive_cache.max_bytes";
pub const KEY_ARCHIVE_MAX_AGE_DAYS: &str = "archive_cache.max_age_days";
pub const KEY_ARCHIVE_CLEAR_ON_LAUNCH: &str = "archive_cache.clear_on_launch";
pub const KEY_REMOTE_MAX_TRACKS: &str = "remote_cache.max_tracks";
pub const KEY_REMOTE_MAX_BYTES: &str = "remote_cache.max_bytes";
pub const KEY_REMOTE_CLEAR_ON_LAUNCH: &str = "remote_cache.clear_on_launch";
pub const KEY_FORCE_CACHE: &str = "sources.force_cache";

const GIB: u64 = 1024 * 1024 * 1024;

/// Budgets for the archive mount cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveCacheLimits {
    /// Maximum number of extracted archives kept on disk
    pub max_mounts: usize,
    /// Maximum total bytes across all mounts
    pub max_bytes: u64,
    /// Mounts not touched for this many days are removed (0 disables)
    pub max_age_days: u32,
    /// Wipe every mount on startup
    pub clear_on_launch: bool,
}

impl Default for ArchiveCacheLimits {
    fn default() -> Self {
        Self {
            max_mounts: 16,
            max_bytes: 2 * GIB,
            max_age_days: 30,
            clear_on_launch: false,
        }
    }
}

/// Budgets for the remote download cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCacheLimits {
    /// Maximum number of cached tracks
    pub max_tracks: usize,
    /// Maximum total bytes across cached tracks
    pub max_bytes: u64,
    /// Wipe every cached track on startup
    pub clear_on_launch: bool,
}

impl Default for RemoteCacheLimits {
    fn default() -> Self {
        Self {
            max_tracks: 200,
            max_bytes: 2 * GIB,
            clear_on_launch: false,
        }
    }
}

/// HTTP behaviour shared by downloads and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
    /// Redirect hops followed before giving up
    pub max_redirects: u8,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            user_agent: "mpc-sources/0.1.0".to_string(),
            max_redirects: 6,
        }
    }
}

/// Rate limit for progress events: both bounds must be crossed before the
/// next event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressThrottle {
    pub min_interval: Duration,
    pub min_bytes: u64,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(200),
            min_bytes: 256 * 1024,
        }
    }
}

/// Configuration for source resolution and both cache domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCacheConfig {
    /// Root directory holding one subdirectory per extracted archive
    pub archive_root: PathBuf,
    /// Root directory holding downloaded remote tracks
    pub remote_root: PathBuf,
    pub archive: ArchiveCacheLimits,
    pub remote: RemoteCacheLimits,
    pub http: HttpSettings,
    pub progress: ProgressThrottle,
    /// Read buffer size for downloads and extraction
    pub chunk_size: usize,
    /// Bound on the direct-stream probe
    pub direct_probe_timeout: Duration,
    /// Bound on opening a file once it is in the cache
    pub cache_open_timeout: Duration,
    /// Skip the direct-stream probe and always download first
    pub force_cache: bool,
}

impl SourceCacheConfig {
    pub fn builder() -> SourceCacheConfigBuilder {
        SourceCacheConfigBuilder::default()
    }

    /// Check budgets and paths for obviously broken values.
    pub fn validate(&self) -> Result<()> {
        if self.archive_root.as_os_str().is_empty() {
            return Err(Error::Config("archive_root cannot be empty".to_string()));
        }
        if self.remote_root.as_os_str().is_empty() {
            return Err(Error::Config("remote_root cannot be empty".to_string()));
        }
        if self.archive_root == self.remote_root {
            return Err(Error::Config(
                "archive_root and remote_root must be different directories".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than 0".to_string()));
        }
        if self.http.max_redirects == 0 {
            return Err(Error::Config("max_redirects must be at least 1".to_string()));
        }
        if self.direct_probe_timeout.is_zero() || self.cache_open_timeout.is_zero() {
            return Err(Error::Config("open timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Overlay the user's cache preferences from `store` onto `self`.
    ///
    /// Missing keys keep the current value; negative numbers are rejected.
    pub async fn load(mut self, store: &dyn SettingsStore) -> Result<Self> {
        if let Some(v) = read_count(store, KEY_ARCHIVE_MAX_MOUNTS).await? {
            self.archive.max_mounts = v as usize;
        }
        if let Some(v) = read_count(store, KEY_ARCHIVE_MAX_BYTES).await? {
            self.archive.max_bytes = v;
        }
        if let Some(v) = read_count(store, KEY_ARCHIVE_MAX_AGE_DAYS).await? {
            self.archive.max_age_days = u32::try_from(v).map_err(|_| Error::InvalidSetting {
                key: KEY_ARCHIVE_MAX_AGE_DAYS.to_string(),
                message: "value out of range".to_string(),
            })?;
        }
        if let Some(v) = store.get_bool(KEY_ARCHIVE_CLEAR_ON_LAUNCH).await? {
            self.archive.clear_on_launch = v;
        }
        if let Some(v) = read_count(store, KEY_REMOTE_MAX_TRACKS).await? {
            self.remote.max_tracks = v as usize;
        }
        if let Some(v) = read_count(store, KEY_REMOTE_MAX_BYTES).await? {
            self.remote.max_bytes = v;
        }
        if let Some(v) = store.get_bool(KEY_REMOTE_CLEAR_ON_LAUNCH).await? {
            self.remote.clear_on_launch = v;
        }
        if let Some(v) = store.get_bool(KEY_FORCE_CACHE).await? {
            self.force_cache = v;
        }

        self.validate()?;
        Ok(self)
    }
}

async fn read_count(store: &dyn SettingsStore, key: &str) -> Result<Option<u64>> {
    match store.get_i64(key).await? {
        Some(v) if v < 0 => Err(Error::InvalidSetting {
            key: key.to_string(),
            message: format!("must not be negative (got {})", v),
        }),
        Some(v) => Ok(Some(v as u64)),
        None => Ok(None),
    }
}

/// Builder for [`SourceCacheConfig`].
#[derive(Debug, Default)]
pub struct SourceCacheConfigBuilder {
    archive_root: Option<PathBuf>,
    remote_root: Option<PathBuf>,
    archive: ArchiveCacheLimits,
    remote: RemoteCacheLimits,
    http: HttpSettings,
    progress: ProgressThrottle,
    chunk_size: Option<usize>,
    direct_probe_timeout: Option<Duration>,
    cache_open_timeout: Option<Duration>,
    force_cache: bool,
}

impl SourceCacheConfigBuilder {
    pub fn archive_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_root = Some(path.into());
        self
    }

    pub fn remote_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.remote_root = Some(path.into());
        self
    }

    pub fn archive_limits(mut self, limits: ArchiveCacheLimits) -> Self {
        self.archive = limits;
        self
    }

    pub fn remote_limits(mut self, limits: RemoteCacheLimits) -> Self {
        self.remote = limits;
        self
    }

    pub fn remote_max_tracks(mut self, count: usize) -> Self {
        self.remote.max_tracks = count;
        self
    }

    pub fn http(mut self, http: HttpSettings) -> Self {
        self.http = http;
        self
    }

    pub fn progress(mut self, throttle: ProgressThrottle) -> Self {
        self.progress = throttle;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn direct_probe_timeout(mut self, timeout: Duration) -> Self {
        self.direct_probe_timeout = Some(timeout);
        self
    }

    pub fn cache_open_timeout(mut self, timeout: Duration) -> Self {
        self.cache_open_timeout = Some(timeout);
        self
    }

    pub fn force_cache(mut self, force: bool) -> Self {
        self.force_cache = force;
        self
    }

    /// Build and validate.
    ///
    /// # Errors
    ///
    /// Fails when a cache root is missing (and no desktop default is
    /// available) or when validation rejects a value.
    pub fn build(self) -> Result<SourceCacheConfig> {
        let (archive_root, remote_root) = self.resolve_roots()?;

        let config = SourceCacheConfig {
            archive_root,
            remote_root,
            archive: self.archive,
            remote: self.remote,
            http: self.http,
            progress: self.progress,
            chunk_size: self.chunk_size.unwrap_or(64 * 1024),
            direct_probe_timeout: self
                .direct_probe_timeout
                .unwrap_or(Duration::from_secs(20)),
            cache_open_timeout: self.cache_open_timeout.unwrap_or(Duration::from_secs(20)),
            force_cache: self.force_cache,
        };
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "desktop-shims")]
    fn resolve_roots(&self) -> Result<(PathBuf, PathBuf)> {
        let defaults = bridge_desktop::default_cache_roots("mpc");
        Ok((
            self.archive_root.clone().unwrap_or(defaults.archive_root),
            self.remote_root.clone().unwrap_or(defaults.remote_root),
        ))
    }

    #[cfg(not(feature = "desktop-shims"))]
    fn resolve_roots(&self) -> Result<(PathBuf, PathBuf)> {
        let archive_root = self.archive_root.clone().ok_or_else(|| {
            Error::Config(
                "archive_root is required. Desktop: enable the `desktop-shims` feature. \
                 Other hosts: pass the platform cache directory."
                    .to_string(),
            )
        })?;
        let remote_root = self.remote_root.clone().ok_or_else(|| {
            Error::Config(
                "remote_root is required. Desktop: enable the `desktop-shims` feature. \
                 Other hosts: pass the platform cache directory."
                    .to_string(),
            )
        })?;
        Ok((archive_root, remote_root))
    }
}
