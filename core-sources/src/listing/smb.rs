use super::{sort_entries, DirectoryEntry};
use crate::error::{Result, SourceError};
use crate::spec::SmbSourceSpec;
use crate::transport::SmbConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Lists SMB shares of a host, or entries inside a share.
#[derive(Clone)]
pub struct SmbDirectoryLister {
    connector: SmbConnector,
}

impl SmbDirectoryLister {
    pub fn new(connector: SmbConnector) -> Self {
        Self { connector }
    }

    /// Shares when `spec` names only a host, directory entries otherwise.
    pub async fn list(
        &self,
        spec: &SmbSourceSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        if spec.share().is_none() {
            self.list_host_shares(spec, cancel).await
        } else {
            self.list_share_entries(spec, cancel).await
        }
    }

    /// Entries of the directory at `spec`'s path inside its share.
    #[instrument(skip_all, fields(source_id = %spec.source_id()))]
    pub async fn list_share_entries(
        &self,
        spec: &SmbSourceSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        let share = spec
            .share()
            .ok_or_else(|| SourceError::InvalidLocator("SMB location has no share".into()))?;
        let session = self.connector.connect(spec, cancel).await?;
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            res = session.list_directory(share, spec.share_path()) => res?,
        };

        let mut entries: Vec<DirectoryEntry> = listed
            .into_iter()
            .filter(|e| e.name != "." && e.name != ".." && !e.name.is_empty())
            .map(|e| {
                let is_directory = e.is_directory();
                let child = spec.child(&e.name, is_directory);
                DirectoryEntry {
                    source_id: child.source_id(),
                    size: (!is_directory).then_some(e.size),
                    name: e.name,
                    is_directory,
                }
            })
            .collect();
        sort_entries(&mut entries);
        debug!(entries = entries.len(), "Listed SMB directory");
        Ok(entries)
    }

    /// Disk shares exposed by `spec`'s host.
    #[instrument(skip_all, fields(host = %spec.host()))]
    pub async fn list_host_shares(
        &self,
        spec: &SmbSourceSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        let session = self.connector.connect(spec, cancel).await?;
        let shares = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            res = session.list_shares() => res?,
        };

        let mut entries: Vec<DirectoryEntry> = shares
            .into_iter()
            .filter(|s| s.is_disk())
            .map(|s| DirectoryEntry {
                source_id: spec.child(&s.name, true).source_id(),
                name: s.name,
                is_directory: true,
                size: None,
            })
            .collect();
        sort_entries(&mut entries);
        debug!(shares = entries.len(), "Listed SMB shares");
        Ok(entries)
    }
}
