//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AudioSource, HttpClient, HttpRequest, HttpResponse, PlaybackEngine, SmbAuth, SmbDirEntry,
    SmbError, SmbFile, SmbSession, SmbShareInfo, SmbTransport, TrackInfo,
};
use core_runtime::config::SourceCacheConfig;
use core_sources::{Credentials, SourceService};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ============================================================================
// HTTP
// ============================================================================

/// Body that hands out one chunk per read and can cancel a token once a
/// given number of chunks has been delivered.
pub struct ChunkedBody {
    chunks: VecDeque<Vec<u8>>,
    delivered: usize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ChunkedBody {
    pub fn new(body: &[u8], chunk: usize) -> Self {
        Self {
            chunks: body.chunks(chunk.max(1)).map(<[u8]>::to_vec).collect(),
            delivered: 0,
            cancel_after: None,
        }
    }

    pub fn cancel_after(mut self, chunks: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((chunks, token));
        self
    }
}

impl AsyncRead for ChunkedBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if let Some(chunk) = this.chunks.pop_front() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
            if n < chunk.len() {
                this.chunks.push_front(chunk[n..].to_vec());
            } else {
                this.delivered += 1;
                if let Some((after, token)) = &this.cancel_after {
                    if this.delivered == *after {
                        token.cancel();
                    }
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Canned response for one URL.
#[derive(Clone)]
pub struct Route {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    chunk: usize,
    cancel_after: Option<(usize, CancellationToken)>,
    /// Expected `Authorization` header; anything else gets a 401
    authorization: Option<String>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: body.into(),
            chunk: 1024,
            cancel_after: None,
            authorization: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Vec::new())
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn cancel_after(mut self, chunks: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((chunks, token));
        self
    }

    pub fn require_basic(mut self, username: &str, password: &str) -> Self {
        let encoded = Credentials::new(username, password).basic_auth();
        self.authorization = Some(format!("Basic {}", encoded));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub url: String,
    pub authorization: Option<String>,
}

/// In-memory web server keyed by full URL.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<HashMap<String, Route>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, route: Route) {
        self.routes.lock().insert(url.to_string(), route);
    }

    pub fn hits(&self, url: &str) -> usize {
        self.seen.lock().iter().filter(|r| r.url == url).count()
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn send(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let authorization = request.headers.get("Authorization").cloned();
        self.seen.lock().push(SeenRequest {
            url: request.url.clone(),
            authorization: authorization.clone(),
        });

        let route = self
            .routes
            .lock()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Route::status(404));

        if route.authorization.is_some() && route.authorization != authorization {
            let mut headers = HashMap::new();
            headers.insert(
                "WWW-Authenticate".to_string(),
                "Basic realm=\"music\"".to_string(),
            );
            return Ok(HttpResponse::new(
                401,
                headers,
                Box::new(ChunkedBody::new(b"", 1)),
            ));
        }

        let mut body = ChunkedBody::new(&route.body, route.chunk);
        if let Some((after, token)) = route.cancel_after {
            body = body.cancel_after(after, token);
        }
        let mut headers = route.headers;
        headers
            .entry("Content-Length".to_string())
            .or_insert_with(|| route.body.len().to_string());
        Ok(HttpResponse::new(route.status, headers, Box::new(body)))
    }
}

// ============================================================================
// SMB
// ============================================================================

/// One-host SMB server. Only `credentials` may log in when set; otherwise
/// anonymous sessions are accepted.
#[derive(Default)]
pub struct FakeSmb {
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    credentials: Option<(String, String)>,
    logins: Mutex<Vec<&'static str>>,
}

impl FakeSmb {
    pub fn with_login(username: &str, password: &str) -> Self {
        Self {
            credentials: Some((username.to_string(), password.to_string())),
            ..Self::default()
        }
    }

    pub fn put(&self, share: &str, path: &str, data: &[u8]) {
        self.files
            .lock()
            .insert((share.to_string(), path.to_string()), data.to_vec());
    }

    pub fn logins(&self) -> Vec<&'static str> {
        self.logins.lock().clone()
    }
}

struct FakeSmbSession {
    files: HashMap<(String, String), Vec<u8>>,
}

#[async_trait]
impl SmbSession for FakeSmbSession {
    async fn list_shares(&self) -> Result<Vec<SmbShareInfo>, SmbError> {
        let mut names: Vec<String> = self.files.keys().map(|(s, _)| s.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|name| SmbShareInfo {
                name,
                share_type: bridge_traits::smb::STYPE_DISKTREE,
            })
            .collect())
    }

    async fn list_directory(&self, share: &str, path: &str) -> Result<Vec<SmbDirEntry>, SmbError> {
        let prefix = path.trim_end_matches('/');
        Ok(self
            .files
            .iter()
            .filter(|((s, p), _)| s == share && Path::new(p).parent() == Some(Path::new(prefix)))
            .map(|((_, p), data)| SmbDirEntry {
                name: p.rsplit('/').next().unwrap_or(p).to_string(),
                attributes: 0x20,
                size: data.len() as u64,
            })
            .collect())
    }

    async fn open_file(&self, share: &str, path: &str) -> Result<SmbFile, SmbError> {
        let data = self
            .files
            .get(&(share.to_string(), path.to_string()))
            .cloned()
            .ok_or(SmbError::Status(core_sources::error::STATUS_OBJECT_NAME_NOT_FOUND))?;
        Ok(SmbFile {
            size: Some(data.len() as u64),
            reader: Box::new(ChunkedBody::new(&data, 512)),
        })
    }
}

#[async_trait]
impl SmbTransport for FakeSmb {
    async fn connect(
        &self,
        _host: &str,
        _port: Option<u16>,
        auth: &SmbAuth,
    ) -> Result<Box<dyn SmbSession>, SmbError> {
        self.logins.lock().push(auth.label());
        let allowed = match (&self.credentials, auth) {
            (None, SmbAuth::Anonymous) => true,
            (
                Some((user, pass)),
                SmbAuth::Credentials {
                    username, password, ..
                },
            ) => user == username && pass == password,
            _ => false,
        };
        if !allowed {
            return Err(SmbError::Status(core_sources::error::STATUS_LOGON_FAILURE));
        }
        Ok(Box::new(FakeSmbSession {
            files: self.files.lock().clone(),
        }))
    }
}

// ============================================================================
// Playback engine
// ============================================================================

mock! {
    pub Engine {}

    #[async_trait]
    impl PlaybackEngine for Engine {
        async fn open(&self, source: AudioSource) -> BridgeResult<TrackInfo>;
        fn supports_direct_stream(&self, scheme: &str) -> bool;
    }
}

pub fn playable_track() -> TrackInfo {
    TrackInfo {
        sample_rate: 44_100,
        channels: 2,
        title: Some("Fixture".to_string()),
        ..TrackInfo::default()
    }
}

/// Engine that never streams directly and accepts every local file.
pub fn caching_engine() -> MockEngine {
    let mut engine = MockEngine::new();
    engine.expect_supports_direct_stream().return_const(false);
    engine
        .expect_open()
        .withf(|source| !source.is_remote())
        .returning(|_| Ok(playable_track()));
    engine
}

// ============================================================================
// Wiring and fixtures
// ============================================================================

pub fn config(dir: &TempDir) -> SourceCacheConfig {
    SourceCacheConfig::builder()
        .archive_root(dir.path().join("archive_mounts"))
        .remote_root(dir.path().join("remote_tracks"))
        .chunk_size(4096)
        .build()
        .unwrap()
}

pub fn service(dir: &TempDir, http: Arc<FakeHttp>, engine: MockEngine) -> SourceService {
    SourceService::builder(config(dir), Arc::new(engine))
        .http_client(http)
        .build()
        .unwrap()
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Names of the files directly under `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
