//! Settings and History Abstractions
//!
//! The core reads its cache budgets from the host's preferences store and
//! reports successfully opened sources to the host's recents list. Both are
//! owned by the host; the core never persists either itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences storage. The core only reads.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remote_budget(store: &dyn SettingsStore) -> Result<i64> {
///     Ok(store.get_i64("remote_cache.max_tracks").await?.unwrap_or(200))
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;
}

/// Source that was opened successfully and belongs in the recents list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentSource {
    /// Credential-free source identity (cache/dedup key).
    pub source_id: String,
    /// Human-readable location for the UI.
    pub display: String,
    /// Whether the source was a directory listing rather than a track.
    pub is_directory: bool,
}

/// Receiver for successfully opened sources.
#[async_trait]
pub trait RecentsSink: Send + Sync {
    async fn record(&self, source: RecentSource) -> Result<()>;
}
