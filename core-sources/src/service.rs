//! Source service façade.
//!
//! Wires host-provided bridges (HTTP, SMB, playback engine, recents) into the
//! caches, listers and the open coordinator, and runs cache maintenance.
//! Desktop hosts enable the `desktop-shims` feature to get the reqwest-backed
//! HTTP client without supplying one.

use crate::archive_cache::ArchiveMountCache;
use crate::coordinator::{
    OpenCoordinator, OpenOrigin, OpenOutcome, OpenRequest, TrackValidationPolicy,
};
use crate::credentials::{CredentialStore, Credentials, SessionCredentialStore};
use crate::error::{Result, SourceError};
use crate::listing::{
    sort_entries, DirectoryEntry, HttpDirectoryLister, ListingObserver, SmbDirectoryLister,
};
use crate::maintenance::{CacheStats, EvictionReport};
use crate::remote_cache::{RemoteCache, RemoteDownloader};
use crate::spec::{Locator, LocatorClassifier, RemoteSpec};
use crate::transport::{HttpFetcher, SmbConnector};
use bridge_traits::{
    Clock, HttpClient, PlaybackEngine, RecentSource, RecentsSink, SmbTransport, SystemClock,
};
use core_runtime::config::SourceCacheConfig;
use core_runtime::events::{CacheDomain, CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::strip_path;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Results of one maintenance pass over both caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub archive: EvictionReport,
    pub remote: EvictionReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub archive: CacheStats,
    pub remote: CacheStats,
}

/// Builder for [`SourceService`].
pub struct SourceServiceBuilder {
    config: SourceCacheConfig,
    engine: Arc<dyn PlaybackEngine>,
    http: Option<Arc<dyn HttpClient>>,
    smb: Option<Arc<dyn SmbTransport>>,
    recents: Option<Arc<dyn RecentsSink>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    event_bus: Option<EventBus>,
    clock: Option<Arc<dyn Clock>>,
    policy: Option<Arc<dyn TrackValidationPolicy>>,
    classifier: Option<LocatorClassifier>,
}

impl SourceServiceBuilder {
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Without a transport, SMB locators fail with a transport error.
    pub fn smb_transport(mut self, smb: Arc<dyn SmbTransport>) -> Self {
        self.smb = Some(smb);
        self
    }

    pub fn recents(mut self, recents: Arc<dyn RecentsSink>) -> Self {
        self.recents = Some(recents);
        self
    }

    pub fn credential_store(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn validation_policy(mut self, policy: Arc<dyn TrackValidationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn classifier(mut self, classifier: LocatorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Validate the configuration, open both cache roots and wire everything.
    pub fn build(self) -> Result<SourceService> {
        self.config.validate()?;
        let http = match self.http {
            Some(http) => http,
            None => default_http_client(&self.config)?,
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(SessionCredentialStore::new()) as Arc<dyn CredentialStore>);

        let archive = Arc::new(ArchiveMountCache::open(
            &self.config.archive_root,
            clock.clone(),
            self.config.chunk_size,
        )?);
        let remote = Arc::new(RemoteCache::open(&self.config.remote_root, clock)?);
        let fetcher = HttpFetcher::new(http, self.config.http.max_redirects);
        let smb = self.smb.map(SmbConnector::new);
        let downloader = RemoteDownloader::new(
            remote.clone(),
            fetcher.clone(),
            smb.clone(),
            self.config.chunk_size,
            self.config.progress,
        );

        let mut coordinator = OpenCoordinator::new(
            &self.config,
            self.engine,
            archive.clone(),
            downloader,
            credentials.clone(),
        );
        if let Some(classifier) = self.classifier {
            coordinator = coordinator.with_classifier(classifier);
        }
        if let Some(policy) = self.policy {
            coordinator = coordinator.with_policy(policy);
        }
        if let Some(recents) = &self.recents {
            coordinator = coordinator.with_recents(recents.clone());
        }
        if let Some(bus) = &self.event_bus {
            coordinator = coordinator.with_event_bus(bus.clone());
        }

        info!(
            archive_root = %strip_path(&self.config.archive_root.to_string_lossy()),
            remote_root = %strip_path(&self.config.remote_root.to_string_lossy()),
            smb = smb.is_some(),
            "Source service ready"
        );

        Ok(SourceService {
            http_lister: HttpDirectoryLister::new(fetcher, self.config.chunk_size),
            smb_lister: smb.map(SmbDirectoryLister::new),
            config: self.config,
            archive,
            remote,
            coordinator: Arc::new(coordinator),
            credentials,
            recents: self.recents,
            event_bus: self.event_bus,
        })
    }
}

#[cfg(feature = "desktop-shims")]
fn default_http_client(config: &SourceCacheConfig) -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::with_settings(
        config.http.connect_timeout,
        config.http.read_timeout,
        &config.http.user_agent,
    )?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_http_client(_config: &SourceCacheConfig) -> Result<Arc<dyn HttpClient>> {
    Err(SourceError::Bridge(bridge_traits::BridgeError::NotAvailable(
        "no HTTP client configured".to_string(),
    )))
}

/// Entry point for hosts: open, list and maintain sources.
#[derive(Clone)]
pub struct SourceService {
    config: SourceCacheConfig,
    archive: Arc<ArchiveMountCache>,
    remote: Arc<RemoteCache>,
    coordinator: Arc<OpenCoordinator>,
    http_lister: HttpDirectoryLister,
    smb_lister: Option<SmbDirectoryLister>,
    credentials: Arc<dyn CredentialStore>,
    recents: Option<Arc<dyn RecentsSink>>,
    event_bus: Option<EventBus>,
}

impl SourceService {
    pub fn builder(config: SourceCacheConfig, engine: Arc<dyn PlaybackEngine>) -> SourceServiceBuilder {
        SourceServiceBuilder {
            config,
            engine,
            http: None,
            smb: None,
            recents: None,
            credentials: None,
            event_bus: None,
            clock: None,
            policy: None,
            classifier: None,
        }
    }

    pub fn config(&self) -> &SourceCacheConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<OpenCoordinator> {
        &self.coordinator
    }

    pub fn archive_cache(&self) -> &Arc<ArchiveMountCache> {
        &self.archive
    }

    pub fn remote_cache(&self) -> &Arc<RemoteCache> {
        &self.remote
    }

    /// Apply `clear_on_launch` for each cache, then enforce the budgets.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<MaintenanceReport> {
        if self.config.archive.clear_on_launch {
            self.clear(CacheDomain::Archive).await?;
        }
        if self.config.remote.clear_on_launch {
            self.clear(CacheDomain::Remote).await?;
        }
        self.enforce_limits().await
    }

    pub async fn open(&self, locator: &str, origin: OpenOrigin) -> OpenOutcome {
        self.coordinator.open(OpenRequest::new(locator, origin)).await
    }

    /// Retry after an auth prompt.
    pub async fn open_with_credentials(
        &self,
        locator: &str,
        origin: OpenOrigin,
        credentials: Credentials,
    ) -> OpenOutcome {
        self.coordinator
            .open(OpenRequest::new(locator, origin).with_credentials(credentials))
            .await
    }

    pub fn cancel(&self, origin: OpenOrigin) {
        self.coordinator.cancel(origin);
    }

    /// List a local directory, an HTTP index page, SMB host shares or an SMB
    /// directory.
    pub async fn list(
        &self,
        locator: &str,
        observer: ListingObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        self.list_inner(locator, None, observer, cancel).await
    }

    pub async fn list_with_credentials(
        &self,
        locator: &str,
        credentials: Credentials,
        observer: ListingObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        self.list_inner(locator, Some(credentials), observer, cancel)
            .await
    }

    async fn list_inner(
        &self,
        locator: &str,
        explicit: Option<Credentials>,
        observer: ListingObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        let locator = self.coordinator.classifier().classify(locator)?;
        let entries = match &locator {
            Locator::LocalDirectory(path) => list_local(path).await?,
            Locator::Remote(spec) => {
                let spec = match explicit {
                    Some(credentials) => spec.clone().with_credentials(credentials),
                    None if spec.credentials().is_some() => spec.clone(),
                    None => match self.credentials.lookup(&spec.scope()) {
                        Some(stored) => spec.clone().with_credentials(stored),
                        None => spec.clone(),
                    },
                };
                let entries = match &spec {
                    RemoteSpec::Http(http) => {
                        self.http_lister
                            .list_directory(http, observer, cancel)
                            .await?
                    }
                    RemoteSpec::Smb(smb) => {
                        let lister = self.smb_lister.as_ref().ok_or_else(|| {
                            SourceError::Transport("SMB is not available on this host".into())
                        })?;
                        lister.list(smb, cancel).await?
                    }
                };
                if let Some(credentials) = spec.credentials() {
                    self.credentials.remember(&spec.scope(), credentials.clone());
                }
                entries
            }
            Locator::LocalFile(_) | Locator::Archive(_) => {
                return Err(SourceError::InvalidLocator(format!(
                    "{} is not a directory",
                    locator.display()
                )))
            }
        };

        if let Some(recents) = &self.recents {
            let recent = RecentSource {
                source_id: locator.source_id(),
                display: locator.display(),
                is_directory: true,
            };
            if let Err(e) = recents.record(recent).await {
                warn!(error = %e, "Failed to record recent directory");
            }
        }
        Ok(entries)
    }

    /// Bring both caches within their configured budgets.
    #[instrument(skip(self))]
    pub async fn enforce_limits(&self) -> Result<MaintenanceReport> {
        let limits = self.config.archive;
        let archive = self
            .archive
            .enforce_limits(limits.max_mounts, limits.max_bytes, limits.max_age_days)
            .await?;
        let remote = self.remote.enforce_limits(
            self.config.remote.max_tracks,
            self.config.remote.max_bytes,
            &self.coordinator.protected_paths(),
        )?;

        for (domain, report) in [(CacheDomain::Archive, archive), (CacheDomain::Remote, remote)] {
            if report.removed > 0 {
                self.emit(CacheEvent::Evicted {
                    domain,
                    removed: report.removed,
                    freed_bytes: report.freed_bytes,
                });
            }
        }
        Ok(MaintenanceReport { archive, remote })
    }

    /// Empty one cache domain. Files loaded in the engine stay.
    pub async fn clear(&self, domain: CacheDomain) -> Result<EvictionReport> {
        let report = match domain {
            CacheDomain::Archive => self.archive.clear_all().await?,
            CacheDomain::Remote => self.remote.clear_all(&self.coordinator.protected_paths())?,
        };
        self.emit(CacheEvent::Cleared { domain });
        Ok(report)
    }

    pub fn stats(&self) -> Result<SourceStats> {
        Ok(SourceStats {
            archive: self.archive.stats()?,
            remote: self.remote.stats()?,
        })
    }

    /// Sign out of `host`: the next attempt prompts again.
    pub fn forget_credentials(&self, host: &str) {
        debug!(host, "Forgetting credentials");
        self.credentials.forget(host);
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Cache(event)).ok();
        }
    }
}

impl std::fmt::Debug for SourceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceService")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

async fn list_local(dir: &Path) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let path = entry.path();
        entries.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            source_id: path.to_string_lossy().into_owned(),
            is_directory: meta.is_dir(),
            size: meta.is_file().then_some(meta.len()),
        });
    }
    sort_entries(&mut entries);
    Ok(entries)
}
