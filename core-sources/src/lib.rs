//! # Source Acquisition
//!
//! Resolves user-supplied locators into local files the playback engine can
//! open, and keeps the on-disk caches behind that bounded.
//!
//! ## Overview
//!
//! - Parsing HTTP(S), SMB and `archive://` locators into typed specs
//! - Extracting ZIP archives into a mount cache with zip-slip protection
//! - Downloading HTTP and SMB files into a bounded LRU cache
//! - Listing HTTP index pages and SMB shares
//! - Driving each open through direct-stream probe, download and validation
//!
//! ## Components
//!
//! - **Specs** (`spec`): locator classification and per-protocol specs
//! - **Transport** (`transport`): redirect-following HTTP fetcher and SMB auth fallback
//! - **Archive Cache** (`archive_cache`): fingerprinted mounts with a ready marker
//! - **Remote Cache** (`remote_cache`): temp-then-rename downloads with progress
//! - **Listing** (`listing`): streaming anchor parser and SMB directory listing
//! - **Open Coordinator** (`coordinator`): the open state machine
//! - **Service** (`service`): façade wiring bridges, caches and maintenance

pub mod archive_cache;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod listing;
pub mod maintenance;
pub mod remote_cache;
pub mod service;
pub mod spec;
pub mod transport;

pub use archive_cache::{ArchiveMountCache, ExtractLimits};
pub use coordinator::{
    AuthChallenge, MetadataHeuristic, OpenCoordinator, OpenOrigin, OpenOutcome, OpenRequest,
    OpenVia, OpenedSource, TrackValidationPolicy,
};
pub use credentials::{CredentialScope, CredentialStore, Credentials, SessionCredentialStore};
pub use error::{ErrorKind, Result, SourceError};
pub use listing::{DirectoryEntry, HttpDirectoryLister, ListingProgress, SmbDirectoryLister};
pub use maintenance::{CacheStats, EvictionReport};
pub use remote_cache::{CachedFile, LoadEvent, RemoteCache, RemoteDownloader};
pub use service::{MaintenanceReport, SourceService, SourceServiceBuilder, SourceStats};
pub use spec::{ArchiveSourceRef, HttpSourceSpec, Locator, LocatorClassifier, RemoteSpec, SmbSourceSpec};
