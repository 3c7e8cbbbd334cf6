//! # Open Coordinator
//!
//! Drives one open request from raw user input to a track the playback
//! engine accepted.
//!
//! ## Workflow
//!
//! 1. **Classify** the input into a local file, archive entry, HTTP or SMB
//!    source. Stored credentials for the host (or host and share) are
//!    attached to remote sources.
//! 2. **TryDirect**: for remote sources the engine can stream itself, probe
//!    the stream within `direct_probe_timeout`. Any failure, timeout or
//!    empty metadata falls through to the download path.
//! 3. **Download** the file into the remote cache.
//! 4. **Validate**: open the local file through the engine within
//!    `cache_open_timeout` and check the reported metadata with the
//!    [`TrackValidationPolicy`].
//! 5. Finish as [`OpenOutcome::Opened`], [`OpenOutcome::AuthRequired`],
//!    [`OpenOutcome::Failed`] or [`OpenOutcome::Cancelled`].
//!
//! Engine access is serialized through a single gate. A new request from an
//! [`OpenOrigin`] cancels the request still running for that origin.

use crate::archive_cache::ArchiveMountCache;
use crate::credentials::{CredentialScope, CredentialStore, Credentials};
use crate::error::{Result, SourceError};
use crate::remote_cache::{LoadEvent, RemoteDownloader};
use crate::spec::{Locator, LocatorClassifier, RemoteSpec};
use bridge_traits::{AudioSource, PlaybackEngine, RecentSource, RecentsSink, TrackInfo};
use core_runtime::config::SourceCacheConfig;
use core_runtime::events::{CoreEvent, EventBus, LoadPhase, RemoteLoadUiState, SourceEvent};
use core_runtime::logging::redact_uri_credentials;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Where an open request came from. Requests from the same origin
/// supersede each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenOrigin {
    /// Locator typed or pasted by the user
    Manual,
    /// Entry picked in a directory listing
    Browser,
    /// Next item of the play queue
    Queue,
}

/// Request to resolve and open one locator.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub locator: String,
    pub origin: OpenOrigin,
    /// Credentials entered at an auth prompt
    pub credentials: Option<Credentials>,
}

impl OpenRequest {
    pub fn new(locator: impl Into<String>, origin: OpenOrigin) -> Self {
        Self {
            locator: locator.into(),
            origin,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// How the track ended up in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenVia {
    LocalFile,
    Archive,
    DirectStream,
    Cache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenedSource {
    pub source_id: String,
    pub display: String,
    /// Local file handed to the engine; `None` for a direct stream
    pub path: Option<PathBuf>,
    pub track: TrackInfo,
    pub via: OpenVia,
}

/// The server rejected the attempt; retry with credentials for `scope`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub source_id: String,
    pub scope: CredentialScope,
    /// Locator to resubmit together with the credentials
    pub locator: String,
}

#[derive(Debug)]
pub enum OpenOutcome {
    Opened(OpenedSource),
    AuthRequired(AuthChallenge),
    Failed(SourceError),
    Cancelled,
}

impl OpenOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, OpenOutcome::Opened(_))
    }
}

/// Decides whether a track the engine opened is actually playable.
pub trait TrackValidationPolicy: Send + Sync {
    fn is_playable(&self, track: &TrackInfo) -> bool;
}

/// Accepts a track when it reports a sample rate, a duration, or a title or
/// artist. Minimal streams without any of these are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataHeuristic;

impl TrackValidationPolicy for MetadataHeuristic {
    fn is_playable(&self, track: &TrackInfo) -> bool {
        let non_empty = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        track.sample_rate > 0
            || track.duration.is_some_and(|d| !d.is_zero())
            || non_empty(&track.title)
            || non_empty(&track.artist)
    }
}

struct ActiveOpen {
    id: Uuid,
    cancel: CancellationToken,
}

/// Open state machine shared by every origin.
pub struct OpenCoordinator {
    classifier: LocatorClassifier,
    engine: Arc<dyn PlaybackEngine>,
    archive: Arc<ArchiveMountCache>,
    downloader: RemoteDownloader,
    credentials: Arc<dyn CredentialStore>,
    policy: Arc<dyn TrackValidationPolicy>,
    recents: Option<Arc<dyn RecentsSink>>,
    event_bus: Option<EventBus>,
    force_cache: bool,
    direct_probe_timeout: Duration,
    cache_open_timeout: Duration,
    /// The decoding engine cannot be entered from two opens at once.
    engine_gate: tokio::sync::Mutex<()>,
    active: Mutex<HashMap<OpenOrigin, ActiveOpen>>,
    /// Cached files currently loaded in the engine, per origin
    open_files: Mutex<HashMap<OpenOrigin, PathBuf>>,
}

impl OpenCoordinator {
    pub fn new(
        config: &SourceCacheConfig,
        engine: Arc<dyn PlaybackEngine>,
        archive: Arc<ArchiveMountCache>,
        downloader: RemoteDownloader,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            classifier: LocatorClassifier::new(),
            engine,
            archive,
            downloader,
            credentials,
            policy: Arc::new(MetadataHeuristic),
            recents: None,
            event_bus: None,
            force_cache: config.force_cache,
            direct_probe_timeout: config.direct_probe_timeout,
            cache_open_timeout: config.cache_open_timeout,
            engine_gate: tokio::sync::Mutex::new(()),
            active: Mutex::new(HashMap::new()),
            open_files: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: LocatorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn TrackValidationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_recents(mut self, recents: Arc<dyn RecentsSink>) -> Self {
        self.recents = Some(recents);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn classifier(&self) -> &LocatorClassifier {
        &self.classifier
    }

    /// Run the full open pipeline for `request`.
    ///
    /// Any request still running for the same origin is cancelled first.
    #[instrument(skip_all, fields(origin = ?request.origin))]
    pub async fn open(&self, request: OpenRequest) -> OpenOutcome {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        if let Some(previous) = self.active.lock().insert(
            request.origin,
            ActiveOpen {
                id,
                cancel: cancel.clone(),
            },
        ) {
            debug!("Superseding previous open from the same origin");
            previous.cancel.cancel();
        }

        let result = self.run(&request, &cancel).await;

        {
            let mut active = self.active.lock();
            if active.get(&request.origin).is_some_and(|a| a.id == id) {
                active.remove(&request.origin);
            }
        }

        self.finish(&request, result).await
    }

    /// Cancel whatever is running for `origin`.
    pub fn cancel(&self, origin: OpenOrigin) {
        if let Some(active) = self.active.lock().remove(&origin) {
            active.cancel.cancel();
        }
    }

    /// Cached files that eviction must leave alone.
    pub fn protected_paths(&self) -> HashSet<PathBuf> {
        self.open_files.lock().values().cloned().collect()
    }

    async fn run(
        &self,
        request: &OpenRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<Attempt, RunError> {
        let locator = self.classifier.classify(&request.locator)?;
        match locator {
            Locator::LocalDirectory(path) => Err(SourceError::InvalidLocator(format!(
                "{} is a directory",
                path.display()
            ))
            .into()),
            Locator::LocalFile(path) => {
                let track = self.open_local(&path, cancel).await?;
                Ok(Attempt::opened(
                    path.to_string_lossy().into_owned(),
                    path.to_string_lossy().into_owned(),
                    Some(path),
                    track,
                    OpenVia::LocalFile,
                ))
            }
            Locator::Archive(reference) => {
                let path = self.archive.open_entry(&reference, cancel).await?;
                let track = self.open_local(&path, cancel).await?;
                Ok(Attempt::opened(
                    reference.source_id(),
                    reference.display(),
                    Some(path),
                    track,
                    OpenVia::Archive,
                ))
            }
            Locator::Remote(spec) => {
                let spec = self.attach_credentials(spec, request.credentials.clone());
                self.open_remote(&spec, cancel)
                    .await
                    .map_err(|error| RunError {
                        error,
                        spec: Some(spec),
                    })
            }
        }
    }

    fn attach_credentials(&self, spec: RemoteSpec, explicit: Option<Credentials>) -> RemoteSpec {
        if let Some(credentials) = explicit {
            return spec.with_credentials(credentials);
        }
        if spec.credentials().is_some() {
            return spec;
        }
        match self.credentials.lookup(&spec.scope()) {
            Some(stored) => {
                debug!(scope = %spec.scope(), "Using remembered credentials");
                spec.with_credentials(stored)
            }
            None => spec,
        }
    }

    async fn open_remote(&self, spec: &RemoteSpec, cancel: &CancellationToken) -> Result<Attempt> {
        if spec.is_directory() {
            return Err(SourceError::InvalidLocator(format!(
                "{} is a directory",
                spec.display_uri()
            )));
        }
        let source_id = spec.source_id();
        if !self.force_cache && self.engine.supports_direct_stream(spec.scheme()) {
            match self.try_direct(spec, cancel).await {
                Ok(track) => {
                    info!("Opened remote source by direct stream");
                    return Ok(Attempt::opened(
                        source_id,
                        spec.display_uri(),
                        None,
                        track,
                        OpenVia::DirectStream,
                    )
                    .remembering(spec));
                }
                Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
                Err(e) => debug!(error = %e, "Direct stream unavailable, downloading"),
            }
        }

        let observer = |event: LoadEvent| match event {
            LoadEvent::Progress(state) | LoadEvent::Finished(state) => {
                self.emit(SourceEvent::LoadProgress(state));
            }
            LoadEvent::Failed { .. } | LoadEvent::Cancelled { .. } => {}
        };
        let cached = self
            .downloader
            .download_to_cache(spec, &observer, cancel)
            .await?;

        self.emit(SourceEvent::LoadProgress(RemoteLoadUiState::phase(
            source_id.as_str(),
            LoadPhase::Opening,
        )));
        let track = self.open_local(&cached.path, cancel).await?;
        Ok(Attempt::opened(
            source_id,
            spec.display_uri(),
            Some(cached.path),
            track,
            OpenVia::Cache,
        )
        .remembering(spec))
    }

    /// Let the engine stream the source itself. Empty metadata counts as a
    /// failure so the caller falls back to downloading.
    async fn try_direct(&self, spec: &RemoteSpec, cancel: &CancellationToken) -> Result<TrackInfo> {
        let source = match spec {
            RemoteSpec::Http(http) => {
                let mut headers = HashMap::new();
                if let Some(encoded) = http.basic_auth() {
                    headers.insert("Authorization".to_string(), format!("Basic {}", encoded));
                }
                AudioSource::RemoteStream {
                    url: http.source_id(),
                    headers,
                }
            }
            RemoteSpec::Smb(smb) => AudioSource::RemoteStream {
                url: smb.request_uri(),
                headers: HashMap::new(),
            },
        };

        let track = self
            .engine_open(source, self.direct_probe_timeout, "direct stream probe", cancel)
            .await?;
        if self.policy.is_playable(&track) {
            Ok(track)
        } else {
            Err(SourceError::Unplayable("direct stream reported no metadata".into()))
        }
    }

    async fn open_local(&self, path: &Path, cancel: &CancellationToken) -> Result<TrackInfo> {
        let track = self
            .engine_open(
                AudioSource::LocalFile {
                    path: path.to_path_buf(),
                },
                self.cache_open_timeout,
                "opening local file",
                cancel,
            )
            .await?;
        if self.policy.is_playable(&track) {
            Ok(track)
        } else {
            Err(SourceError::Unplayable(
                "no sample rate, duration, title or artist".into(),
            ))
        }
    }

    /// Open through the engine gate, bounded by `limit`.
    async fn engine_open(
        &self,
        source: AudioSource,
        limit: Duration,
        what: &str,
        cancel: &CancellationToken,
    ) -> Result<TrackInfo> {
        let attempt = async {
            let _gate = self.engine_gate.lock().await;
            self.engine.open(source).await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            res = tokio::time::timeout(limit, attempt) => match res {
                Ok(Ok(track)) => Ok(track),
                Ok(Err(e)) => Err(SourceError::Unplayable(e.to_string())),
                Err(_) => Err(SourceError::Timeout(format!("{} after {:?}", what, limit))),
            },
        }
    }

    async fn finish(
        &self,
        request: &OpenRequest,
        result: std::result::Result<Attempt, RunError>,
    ) -> OpenOutcome {
        match result {
            Ok(attempt) => {
                if let Some((scope, credentials)) = attempt.remember {
                    self.credentials.remember(&scope, credentials);
                }
                let opened = attempt.opened;
                {
                    let mut open_files = self.open_files.lock();
                    match (&opened.via, &opened.path) {
                        (OpenVia::Cache, Some(path)) => {
                            open_files.insert(request.origin, path.clone());
                        }
                        _ => {
                            open_files.remove(&request.origin);
                        }
                    }
                }
                if let Some(recents) = &self.recents {
                    let recent = RecentSource {
                        source_id: opened.source_id.clone(),
                        display: opened.display.clone(),
                        is_directory: false,
                    };
                    if let Err(e) = recents.record(recent).await {
                        warn!(error = %e, "Failed to record recent source");
                    }
                }
                info!(source_id = %opened.source_id, via = ?opened.via, "Source opened");
                self.emit(SourceEvent::Opened {
                    source_id: opened.source_id.clone(),
                });
                OpenOutcome::Opened(opened)
            }
            Err(RunError {
                error: SourceError::Cancelled,
                ..
            }) => {
                let source_id = self.source_id_for(&request.locator);
                debug!(source_id = %source_id, "Open cancelled");
                self.emit(SourceEvent::Cancelled { source_id });
                OpenOutcome::Cancelled
            }
            Err(RunError {
                error,
                spec: Some(spec),
            }) if error.is_auth_failure() => {
                let challenge = AuthChallenge {
                    source_id: spec.source_id(),
                    scope: spec.scope(),
                    locator: request.locator.clone(),
                };
                info!(
                    source_id = %challenge.source_id,
                    scope = %challenge.scope,
                    reason = %error,
                    "Credentials required"
                );
                self.emit(SourceEvent::AuthRequired {
                    source_id: challenge.source_id.clone(),
                    scope: challenge.scope.to_string(),
                });
                OpenOutcome::AuthRequired(challenge)
            }
            Err(RunError { error, .. }) => {
                let source_id = self.source_id_for(&request.locator);
                warn!(
                    source_id = %source_id,
                    kind = error.kind().as_str(),
                    error = %error,
                    "Open failed"
                );
                self.emit(SourceEvent::Failed {
                    source_id,
                    reason: error.failure_reason(),
                    kind: error.kind().as_str().to_string(),
                });
                OpenOutcome::Failed(error)
            }
        }
    }

    fn source_id_for(&self, input: &str) -> String {
        self.classifier
            .classify(input)
            .map(|l| l.source_id())
            .unwrap_or_else(|_| redact_uri_credentials(input))
    }

    fn emit(&self, event: SourceEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Source(event)).ok();
        }
    }
}

impl std::fmt::Debug for OpenCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCoordinator")
            .field("force_cache", &self.force_cache)
            .field("direct_probe_timeout", &self.direct_probe_timeout)
            .field("cache_open_timeout", &self.cache_open_timeout)
            .finish_non_exhaustive()
    }
}

/// Successful pipeline result plus credentials worth remembering.
struct Attempt {
    opened: OpenedSource,
    remember: Option<(CredentialScope, Credentials)>,
}

impl Attempt {
    fn opened(
        source_id: String,
        display: String,
        path: Option<PathBuf>,
        track: TrackInfo,
        via: OpenVia,
    ) -> Self {
        Self {
            opened: OpenedSource {
                source_id,
                display,
                path,
                track,
                via,
            },
            remember: None,
        }
    }

    fn remembering(mut self, spec: &RemoteSpec) -> Self {
        self.remember = spec.credentials().cloned().map(|c| (spec.scope(), c));
        self
    }
}

/// Failure of one pipeline run, with the remote spec it happened on.
struct RunError {
    error: SourceError,
    spec: Option<RemoteSpec>,
}

impl From<SourceError> for RunError {
    fn from(error: SourceError) -> Self {
        Self { error, spec: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SessionCredentialStore;
    use crate::remote_cache::RemoteCache;
    use crate::transport::HttpFetcher;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{HttpClient, HttpRequest, HttpResponse, SystemClock};
    use core_runtime::config::SourceCacheConfigBuilder;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    mock! {
        Engine {}

        #[async_trait]
        impl PlaybackEngine for Engine {
            async fn open(&self, source: AudioSource) -> BridgeResult<TrackInfo>;
            fn supports_direct_stream(&self, scheme: &str) -> bool;
        }
    }

    /// Serves fixed bodies by URL and counts requests.
    #[derive(Default)]
    struct Server {
        routes: HashMap<String, (u16, Vec<u8>)>,
        hits: AtomicUsize,
    }

    impl Server {
        fn route(mut self, url: &str, status: u16, body: &[u8]) -> Self {
            self.routes.insert(url.to_string(), (status, body.to_vec()));
            self
        }
    }

    #[async_trait]
    impl HttpClient for Server {
        async fn send(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let (status, body) = self
                .routes
                .get(&request.url)
                .cloned()
                .unwrap_or((404, Vec::new()));
            Ok(HttpResponse::new(
                status,
                HashMap::new(),
                Box::new(std::io::Cursor::new(body)),
            ))
        }
    }

    fn track() -> TrackInfo {
        TrackInfo {
            sample_rate: 44_100,
            channels: 2,
            ..TrackInfo::default()
        }
    }

    fn config(dir: &TempDir) -> SourceCacheConfigBuilder {
        SourceCacheConfig::builder()
            .archive_root(dir.path().join("archive"))
            .remote_root(dir.path().join("remote"))
    }

    fn coordinator(
        dir: &TempDir,
        engine: Arc<dyn PlaybackEngine>,
        server: Arc<Server>,
    ) -> OpenCoordinator {
        coordinator_with(config(dir).build().unwrap(), engine, server)
    }

    fn coordinator_with(
        config: SourceCacheConfig,
        engine: Arc<dyn PlaybackEngine>,
        server: Arc<Server>,
    ) -> OpenCoordinator {
        let clock = Arc::new(SystemClock);
        let archive =
            Arc::new(ArchiveMountCache::open(&config.archive_root, clock.clone(), 4096).unwrap());
        let remote = Arc::new(RemoteCache::open(&config.remote_root, clock).unwrap());
        let downloader = RemoteDownloader::new(
            remote,
            HttpFetcher::new(server, 6),
            None,
            4096,
            config.progress,
        );
        OpenCoordinator::new(
            &config,
            engine,
            archive,
            downloader,
            Arc::new(SessionCredentialStore::new()),
        )
    }

    #[test]
    fn test_metadata_heuristic() {
        let policy = MetadataHeuristic;
        assert!(policy.is_playable(&track()));
        assert!(!policy.is_playable(&TrackInfo::default()));
        assert!(!policy.is_playable(&TrackInfo {
            title: Some("  ".into()),
            ..TrackInfo::default()
        }));
        assert!(policy.is_playable(&TrackInfo {
            artist: Some("Nina".into()),
            ..TrackInfo::default()
        }));
        assert!(policy.is_playable(&TrackInfo {
            duration: Some(Duration::from_secs(3)),
            ..TrackInfo::default()
        }));
    }

    #[tokio::test]
    async fn test_local_file_opens_directly() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("song.flac");
        std::fs::write(&file, b"fLaC").unwrap();

        let mut engine = MockEngine::new();
        engine
            .expect_open()
            .withf(|s| matches!(s, AudioSource::LocalFile { .. }))
            .times(1)
            .returning(|_| Ok(track()));
        let coordinator = coordinator(&dir, Arc::new(engine), Arc::new(Server::default()));

        let outcome = coordinator
            .open(OpenRequest::new(file.to_string_lossy(), OpenOrigin::Manual))
            .await;
        match outcome {
            OpenOutcome::Opened(opened) => {
                assert_eq!(opened.via, OpenVia::LocalFile);
                assert_eq!(opened.path.as_deref(), Some(file.as_path()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(coordinator.protected_paths().is_empty());
    }

    #[tokio::test]
    async fn test_direct_stream_skips_download() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(Server::default().route("http://host/a.mp3", 200, b"audio"));

        let mut engine = MockEngine::new();
        engine.expect_supports_direct_stream().return_const(true);
        engine
            .expect_open()
            .withf(|s| matches!(s, AudioSource::RemoteStream { url, .. } if url == "http://host/a.mp3"))
            .times(1)
            .returning(|_| Ok(track()));
        let coordinator = coordinator(&dir, Arc::new(engine), server.clone());

        let outcome = coordinator
            .open(OpenRequest::new("http://host/a.mp3", OpenOrigin::Browser))
            .await;
        match outcome {
            OpenOutcome::Opened(opened) => {
                assert_eq!(opened.via, OpenVia::DirectStream);
                assert!(opened.path.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(server.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_direct_probe_falls_back_to_cache() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(Server::default().route("http://host/a.mp3", 200, b"audio"));

        let mut engine = MockEngine::new();
        engine.expect_supports_direct_stream().return_const(true);
        engine
            .expect_open()
            .withf(|s| s.is_remote())
            .times(1)
            .returning(|_| Ok(TrackInfo::default()));
        engine
            .expect_open()
            .withf(|s| !s.is_remote())
            .times(1)
            .returning(|_| Ok(track()));
        let coordinator = coordinator(&dir, Arc::new(engine), server.clone());

        let outcome = coordinator
            .open(OpenRequest::new("http://host/a.mp3", OpenOrigin::Manual))
            .await;
        let OpenOutcome::Opened(opened) = outcome else {
            panic!("expected an opened source");
        };
        assert_eq!(opened.via, OpenVia::Cache);
        let path = opened.path.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"audio");
        assert!(coordinator.protected_paths().contains(&path));
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_download_asks_for_credentials() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(Server::default().route("http://host/private.mp3", 401, b""));

        let mut engine = MockEngine::new();
        engine.expect_supports_direct_stream().return_const(false);
        engine.expect_open().never();
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let coordinator =
            coordinator(&dir, Arc::new(engine), server).with_event_bus(bus.clone());

        let outcome = coordinator
            .open(OpenRequest::new("http://host/private.mp3", OpenOrigin::Manual))
            .await;
        let OpenOutcome::AuthRequired(challenge) = outcome else {
            panic!("expected an auth challenge");
        };
        assert_eq!(challenge.source_id, "http://host/private.mp3");
        assert_eq!(challenge.scope, CredentialScope::host("host"));

        let mut saw_prompt = false;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Source(SourceEvent::AuthRequired { scope, .. }) = event {
                assert_eq!(scope, "host");
                saw_prompt = true;
            }
        }
        assert!(saw_prompt);
    }

    #[tokio::test]
    async fn test_unplayable_file_fails_validation() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, b"hello").unwrap();

        let mut engine = MockEngine::new();
        engine.expect_open().returning(|_| Ok(TrackInfo::default()));
        let coordinator = coordinator(&dir, Arc::new(engine), Arc::new(Server::default()));

        let outcome = coordinator
            .open(OpenRequest::new(file.to_string_lossy(), OpenOrigin::Queue))
            .await;
        match outcome {
            OpenOutcome::Failed(err) => assert_eq!(err.kind().as_str(), "validation"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_directory_is_not_openable() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(
            &dir,
            Arc::new(MockEngine::new()),
            Arc::new(Server::default()),
        );

        let outcome = coordinator
            .open(OpenRequest::new(
                dir.path().to_string_lossy(),
                OpenOrigin::Manual,
            ))
            .await;
        assert!(matches!(
            outcome,
            OpenOutcome::Failed(SourceError::InvalidLocator(_))
        ));
    }

    /// Hangs on files named `slow.*` until cancelled.
    struct SlowEngine {
        entered: Notify,
    }

    #[async_trait]
    impl PlaybackEngine for SlowEngine {
        async fn open(&self, source: AudioSource) -> BridgeResult<TrackInfo> {
            if let AudioSource::LocalFile { path } = &source {
                if path.file_stem() == Some(std::ffi::OsStr::new("slow")) {
                    self.entered.notify_one();
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
            Ok(track())
        }
    }

    #[tokio::test]
    async fn test_new_open_supersedes_same_origin() {
        let dir = TempDir::new().unwrap();
        let slow = dir.path().join("slow.flac");
        let fast = dir.path().join("fast.flac");
        std::fs::write(&slow, b"a").unwrap();
        std::fs::write(&fast, b"b").unwrap();

        let engine = Arc::new(SlowEngine {
            entered: Notify::new(),
        });
        let coordinator = Arc::new(coordinator(
            &dir,
            engine.clone(),
            Arc::new(Server::default()),
        ));

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            let locator = slow.to_string_lossy().into_owned();
            async move {
                coordinator
                    .open(OpenRequest::new(locator, OpenOrigin::Browser))
                    .await
            }
        });
        engine.entered.notified().await;

        let second = coordinator
            .open(OpenRequest::new(fast.to_string_lossy(), OpenOrigin::Browser))
            .await;
        assert!(second.is_opened());
        assert!(matches!(first.await.unwrap(), OpenOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_origin() {
        let dir = TempDir::new().unwrap();
        let slow = dir.path().join("slow.flac");
        std::fs::write(&slow, b"a").unwrap();

        let engine = Arc::new(SlowEngine {
            entered: Notify::new(),
        });
        let coordinator = Arc::new(coordinator(
            &dir,
            engine.clone(),
            Arc::new(Server::default()),
        ));

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            let locator = slow.to_string_lossy().into_owned();
            async move {
                coordinator
                    .open(OpenRequest::new(locator, OpenOrigin::Queue))
                    .await
            }
        });
        engine.entered.notified().await;
        coordinator.cancel(OpenOrigin::Manual);
        coordinator.cancel(OpenOrigin::Queue);

        assert!(matches!(pending.await.unwrap(), OpenOutcome::Cancelled));
    }

    /// Never answers a stream open; local files open normally.
    struct StalledStreamEngine;

    #[async_trait]
    impl PlaybackEngine for StalledStreamEngine {
        async fn open(&self, source: AudioSource) -> BridgeResult<TrackInfo> {
            if source.is_remote() {
                std::future::pending::<()>().await;
            }
            Ok(track())
        }

        fn supports_direct_stream(&self, _scheme: &str) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_direct_probe_falls_back_to_cache() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(Server::default().route("http://host/a.mp3", 200, b"audio"));
        let config = config(&dir)
            .direct_probe_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let coordinator = coordinator_with(config, Arc::new(StalledStreamEngine), server.clone());

        let outcome = coordinator
            .open(OpenRequest::new("http://host/a.mp3", OpenOrigin::Browser))
            .await;
        let OpenOutcome::Opened(opened) = outcome else {
            panic!("expected an opened source, got {:?}", outcome);
        };
        assert_eq!(opened.via, OpenVia::Cache);
        assert_eq!(std::fs::read(opened.path.unwrap()).unwrap(), b"audio");
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_local_open_times_out() {
        let dir = TempDir::new().unwrap();
        let slow = dir.path().join("slow.flac");
        std::fs::write(&slow, b"a").unwrap();
        let config = config(&dir)
            .cache_open_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let engine = Arc::new(SlowEngine {
            entered: Notify::new(),
        });
        let coordinator = coordinator_with(config, engine, Arc::new(Server::default()));

        let outcome = coordinator
            .open(OpenRequest::new(slow.to_string_lossy(), OpenOrigin::Queue))
            .await;
        match outcome {
            OpenOutcome::Failed(SourceError::Timeout(what)) => {
                assert!(what.contains("opening local file"), "{}", what)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(coordinator.protected_paths().is_empty());
    }
}
