use super::progress::{self, LoadEvent, LoadObserver, ProgressGate};
use super::{CachedFile, DownloadTarget, RemoteCache};
use crate::error::{Result, SourceError};
use crate::spec::RemoteSpec;
use crate::transport::{HttpFetcher, SmbConnector};
use core_runtime::config::ProgressThrottle;
use core_runtime::events::RemoteLoadUiState;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Result of the protocol-specific part of a transfer.
pub(super) enum Fetch {
    /// Temp file holds this many bytes.
    Complete(u64),
    /// Headers revealed a name that is already cached.
    Hit(CachedFile),
}

/// Streams HTTP and SMB files into the [`RemoteCache`].
#[derive(Clone)]
pub struct RemoteDownloader {
    pub(super) cache: Arc<RemoteCache>,
    pub(super) fetcher: HttpFetcher,
    pub(super) smb: Option<SmbConnector>,
    chunk_size: usize,
    throttle: ProgressThrottle,
}

impl RemoteDownloader {
    pub fn new(
        cache: Arc<RemoteCache>,
        fetcher: HttpFetcher,
        smb: Option<SmbConnector>,
        chunk_size: usize,
        throttle: ProgressThrottle,
    ) -> Self {
        Self {
            cache,
            fetcher,
            smb,
            chunk_size: chunk_size.max(1),
            throttle,
        }
    }

    pub fn cache(&self) -> &Arc<RemoteCache> {
        &self.cache
    }

    /// Return a local copy of `spec`, downloading it if not cached.
    ///
    /// `observer` always receives exactly one terminal event. On failure or
    /// cancellation no temp or final file is left behind.
    #[instrument(skip_all, fields(source_id = %spec.source_id()))]
    pub async fn download_to_cache(
        &self,
        spec: &RemoteSpec,
        observer: LoadObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<CachedFile> {
        let source_id = spec.source_id();
        let started = tokio::time::Instant::now();

        match self.download_inner(spec, &source_id, observer, cancel).await {
            Ok(file) => {
                observer(progress::finished(
                    &source_id,
                    file.size_bytes,
                    started.elapsed().as_millis() as u64,
                ));
                Ok(file)
            }
            Err(SourceError::Cancelled) => {
                debug!("Download cancelled");
                observer(LoadEvent::Cancelled { source_id });
                Err(SourceError::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "Download failed");
                observer(LoadEvent::Failed {
                    source_id,
                    reason: e.failure_reason(),
                });
                Err(e)
            }
        }
    }

    async fn download_inner(
        &self,
        spec: &RemoteSpec,
        source_id: &str,
        observer: LoadObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<CachedFile> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            guard = self.cache.lock_source(source_id) => guard,
        };

        if let Some(hit) = self.cache.lookup(source_id)? {
            debug!(size_bytes = hit.size_bytes, "Remote cache hit");
            return Ok(hit);
        }

        let mut target = self.cache.target(source_id, spec.file_name().as_deref());
        File::create(&target.temp).await?;
        self.cache.mark_in_flight(&target.temp);

        let fetched = match spec {
            RemoteSpec::Http(http) => self.fetch_http(http, &mut target, observer, cancel).await,
            RemoteSpec::Smb(smb) => self.fetch_smb(smb, &target, observer, cancel).await,
        };

        let result = match fetched {
            Ok(Fetch::Complete(0)) => Err(SourceError::EmptyDownload),
            Ok(Fetch::Complete(bytes)) => {
                debug!(bytes, "Transfer complete, committing");
                self.cache.commit(&target).await
            }
            Ok(Fetch::Hit(hit)) => {
                info!(file = %hit.path.display(), "Suggested name already cached, discarding transfer");
                Ok(hit)
            }
            Err(e) => Err(e),
        };

        if !matches!(result, Ok(CachedFile { from_cache: false, .. })) {
            remove_temp(&target).await;
        }
        self.cache.clear_in_flight(&target.temp);
        result
    }

    /// Copy `reader` into the target's temp file chunk by chunk.
    pub(super) async fn stream_to_temp<R>(
        &self,
        mut reader: R,
        target: &DownloadTarget,
        total: Option<u64>,
        observer: LoadObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = File::create(&target.temp).await?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut gate = ProgressGate::new(self.throttle);
        let mut downloaded: u64 = 0;

        observer(LoadEvent::Progress(RemoteLoadUiState::downloading(
            &target.source_id,
            0,
            total,
            0,
        )));

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                res = reader.read(&mut buf) => res.map_err(|e| SourceError::Transport(e.to_string()))?,
            };
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            downloaded += n as u64;

            if gate.should_emit(downloaded) {
                observer(LoadEvent::Progress(RemoteLoadUiState::downloading(
                    &target.source_id,
                    downloaded,
                    total,
                    gate.elapsed_ms(),
                )));
            }
        }

        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(downloaded)
    }
}

impl std::fmt::Debug for RemoteDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDownloader")
            .field("cache", &self.cache)
            .field("smb", &self.smb.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

async fn remove_temp(target: &DownloadTarget) {
    match tokio::fs::remove_file(&target.temp).await {
        Ok(()) => debug!("Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "Failed to remove partial download"),
    }
}
