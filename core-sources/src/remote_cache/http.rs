use super::download::{Fetch, RemoteDownloader};
use super::progress::{self, LoadObserver};
use super::DownloadTarget;
use crate::error::Result;
use crate::spec::HttpSourceSpec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl RemoteDownloader {
    pub(super) async fn fetch_http(
        &self,
        spec: &HttpSourceSpec,
        target: &mut DownloadTarget,
        observer: LoadObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Fetch> {
        observer(progress::connecting(&target.source_id));
        let fetched = self.fetcher.get(spec, cancel).await?;

        // The final name is only known once headers (or the redirect
        // target) are in.
        let suggested = fetched
            .response
            .header("content-disposition")
            .and_then(content_disposition_filename)
            .or_else(|| fetched.spec.file_name());

        if let Some(name) = suggested {
            if target.retarget(&name) {
                debug!(file = %target.file_name, "Cache name updated from response");
                if let Some(hit) = self.cache.hit_by_name(&target.source_id, &target.file_name)? {
                    return Ok(Fetch::Hit(hit));
                }
            }
        }

        let total = fetched.response.content_length();
        let bytes = self
            .stream_to_temp(fetched.response.body, target, total, observer, cancel)
            .await?;
        Ok(Fetch::Complete(bytes))
    }
}

/// File name from a `Content-Disposition` header value.
///
/// `filename*=UTF-8''...` wins over a plain `filename=`.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let mut plain = None;
    for param in header.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "filename*" {
            let encoded = match value.split_once("''") {
                Some((_charset, rest)) => rest,
                None => value,
            };
            if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"')) {
                if !decoded.trim().is_empty() {
                    return Some(decoded.into_owned());
                }
            }
        } else if key == "filename" && plain.is_none() {
            let unquoted = value.trim_matches('"').trim();
            if !unquoted.is_empty() {
                plain = Some(unquoted.to_string());
            }
        }
    }
    plain
}
