//! Playback engine bridge.
//!
//! The decoding engine is owned by the host. The core only asks it to open a
//! source (a local file, or a remote stream when probing direct playback) and
//! reads back the metadata the engine was able to extract.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// High-level audio source descriptor provided to the playback engine.
#[derive(Clone)]
pub enum AudioSource {
    /// Local file accessible to the host runtime.
    LocalFile { path: PathBuf },
    /// Remote stream to be fetched by the engine itself.
    ///
    /// `url` is the wire URI and may carry credentials; never log it.
    RemoteStream {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl AudioSource {
    /// Determine whether the source represents remote content.
    pub fn is_remote(&self) -> bool {
        matches!(self, AudioSource::RemoteStream { .. })
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioSource::LocalFile { path } => {
                f.debug_struct("LocalFile").field("path", path).finish()
            }
            AudioSource::RemoteStream { headers, .. } => f
                .debug_struct("RemoteStream")
                .field("url", &"[REDACTED]")
                .field("headers", &headers.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// Metadata reported by the engine after opening a track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// Sample rate in hertz, `0` when unknown.
    pub sample_rate: u32,
    /// Number of channels, `0` when unknown.
    pub channels: u16,
    /// Total duration, when the container reports one.
    pub duration: Option<Duration>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// Host playback engine.
///
/// The engine is a single shared resource; callers serialize access.
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Open `source` and report the metadata the decoder found.
    async fn open(&self, source: AudioSource) -> Result<TrackInfo>;

    /// Whether the engine can play `scheme` (`"http"`, `"https"`, `"smb"`)
    /// directly without a local copy.
    fn supports_direct_stream(&self, scheme: &str) -> bool {
        matches!(scheme, "http" | "https")
    }
}
