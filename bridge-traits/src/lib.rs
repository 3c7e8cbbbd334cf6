//! # Host Bridge Traits
//!
//! Platform abstraction traits the source-acquisition core needs from its host.
//!
//! ## Overview
//!
//! The core resolves locators to local files and keeps its caches bounded,
//! but it does not own a network stack, an SMB implementation, a decoder, or
//! a preferences store. Each of those is a trait here, implemented per host.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-hop HTTP with streaming bodies, no automatic redirects
//! - [`SmbTransport`](smb::SmbTransport) / [`SmbSession`](smb::SmbSession) - SMB session setup, share/dir listing, file reads
//!
//! ### Playback
//! - [`PlaybackEngine`](playback::PlaybackEngine) - Opens a local file or remote stream and reports track metadata
//!
//! ### Host State
//! - [`SettingsStore`](storage::SettingsStore) - Cache limits and policy toggles
//! - [`RecentsSink`](storage::RecentsSink) - Receives successfully opened sources
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Capability | Desktop default |
//! |------------|-----------------|
//! | `HttpClient` | `bridge-desktop::ReqwestHttpClient` |
//! | `SmbTransport` | host supplied |
//! | `PlaybackEngine` | host supplied |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError), except the SMB
//! traits which return [`SmbError`](smb::SmbError) so the core can inspect the
//! raw NT status.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the core shares them across tasks
//! behind `Arc`.

pub mod error;
pub mod http;
pub mod platform;
pub mod playback;
pub mod smb;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use playback::{AudioSource, PlaybackEngine, TrackInfo};
pub use smb::{SmbAuth, SmbDirEntry, SmbError, SmbFile, SmbSession, SmbShareInfo, SmbTransport};
pub use storage::{RecentSource, RecentsSink, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
