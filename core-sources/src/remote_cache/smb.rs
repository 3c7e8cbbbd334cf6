use super::download::{Fetch, RemoteDownloader};
use super::progress::{self, LoadObserver};
use super::DownloadTarget;
use crate::error::{Result, SourceError};
use crate::spec::SmbSourceSpec;
use tokio_util::sync::CancellationToken;

impl RemoteDownloader {
    pub(super) async fn fetch_smb(
        &self,
        spec: &SmbSourceSpec,
        target: &DownloadTarget,
        observer: LoadObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Fetch> {
        let connector = self
            .smb
            .as_ref()
            .ok_or_else(|| SourceError::Transport("SMB is not available on this host".into()))?;
        let share = match spec.share() {
            Some(share) if !spec.is_directory() => share,
            _ => {
                return Err(SourceError::InvalidLocator(format!(
                    "{} is not a file",
                    spec.display_uri()
                )))
            }
        };

        observer(progress::connecting(&target.source_id));
        let session = connector.connect(spec, cancel).await?;

        let file = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            res = session.open_file(share, spec.share_path()) => res?,
        };

        let bytes = self
            .stream_to_temp(file.reader, target, file.size, observer, cancel)
            .await?;
        Ok(Fetch::Complete(bytes))
    }
}
