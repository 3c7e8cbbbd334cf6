use super::html::{Anchor, AnchorScanner};
use super::{sort_entries, DirectoryEntry, ListingObserver, ListingProgress};
use crate::error::{Result, SourceError};
use crate::spec::HttpSourceSpec;
use crate::transport::HttpFetcher;
use std::collections::HashMap;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Labels of column headers and navigation rows in generated index pages.
const HEADER_LABELS: &[&str] = &[
    "name",
    "size",
    "last modified",
    "description",
    "type",
    "date",
    "modified",
    "parent directory",
];

/// Query keys used by index pages for sort and column toggles.
const SORT_KEYS: &[&str] = &["c", "o", "n", "m", "s", "d", "sort", "order", "dir"];

/// Lists server-generated HTML directory indexes.
#[derive(Clone)]
pub struct HttpDirectoryLister {
    fetcher: HttpFetcher,
    chunk_size: usize,
}

impl HttpDirectoryLister {
    pub fn new(fetcher: HttpFetcher, chunk_size: usize) -> Self {
        Self {
            fetcher,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Fetch the index at `spec` and parse its links as the body streams in.
    ///
    /// The page is always treated as a directory, so relative links resolve
    /// below it even when the locator has no trailing `/`.
    #[instrument(skip_all, fields(source_id = %spec.source_id()))]
    pub async fn list_directory(
        &self,
        spec: &HttpSourceSpec,
        observer: ListingObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectoryEntry>> {
        let fetched = self.fetcher.get(&spec.clone().as_directory(), cancel).await?;
        let page = fetched.spec.as_directory();
        let mut body = fetched.response.body;

        let mut scanner = AnchorScanner::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut by_id: HashMap<String, DirectoryEntry> = HashMap::new();
        let mut progress = ListingProgress::default();

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                res = body.read(&mut buf) => res.map_err(|e| SourceError::Transport(e.to_string()))?,
            };
            if n == 0 {
                break;
            }
            for anchor in scanner.push(&buf[..n]) {
                if let Some(entry) = entry_for_anchor(&page, &anchor) {
                    by_id.insert(entry.source_id.clone(), entry);
                }
            }
            progress.bytes_read += n as u64;
            progress.entries_found = by_id.len();
            observer(progress);
        }

        let mut entries: Vec<DirectoryEntry> = by_id.into_values().collect();
        sort_entries(&mut entries);
        debug!(
            entries = entries.len(),
            bytes = progress.bytes_read,
            "Parsed HTTP directory index"
        );
        Ok(entries)
    }
}

/// Apply the index-page filtering rules to one anchor.
fn entry_for_anchor(page: &HttpSourceSpec, anchor: &Anchor) -> Option<DirectoryEntry> {
    let href = anchor.href.trim();
    let lower = href.to_ascii_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || matches!(href, "." | ".." | "./" | "../")
        || is_sort_control(href)
    {
        return None;
    }

    let target = page.resolve(href).ok()?;
    let page_path = page.path().trim_end_matches('/');
    let target_path = target.path().trim_end_matches('/');

    if target_path == page_path {
        return None;
    }

    let label = anchor.text.trim();
    let label_key = label.trim_end_matches('/').to_lowercase();
    let is_ancestor = page_path.starts_with(&format!("{}/", target_path));
    if HEADER_LABELS.contains(&label_key.as_str()) && is_ancestor {
        return None;
    }

    let href_path = href.split(['?', '#']).next().unwrap_or(href);
    let is_directory = href_path.ends_with('/') || label.ends_with('/');
    let target = if is_directory {
        target.as_directory()
    } else {
        target
    };
    let name = target.file_name()?;

    Some(DirectoryEntry {
        name,
        source_id: target.source_id(),
        is_directory,
        size: None,
    })
}

/// `?C=N;O=D` style links that only re-sort the current page.
fn is_sort_control(href: &str) -> bool {
    let Some(query) = href.strip_prefix('?') else {
        return false;
    };
    query
        .split([';', '&'])
        .filter_map(|pair| pair.split('=').next())
        .any(|key| SORT_KEYS.contains(&key.trim().to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(href: &str, text: &str) -> Anchor {
        Anchor {
            href: href.to_string(),
            text: text.to_string(),
        }
    }

    fn page() -> HttpSourceSpec {
        HttpSourceSpec::parse("http://host/music/").unwrap()
    }

    #[test]
    fn test_filtering_rules() {
        let page = page();
        for (href, text) in [
            ("#top", "Top"),
            ("javascript:void(0)", "x"),
            ("mailto:a@b.c", "mail"),
            (".", "."),
            ("..", ".."),
            ("../", "Parent"),
            ("?C=N;O=D", "Name"),
            ("?sort=size", "Size"),
            ("/music/", "Name"),
            ("/", "Parent Directory"),
            ("/music/?page=2", "Next"),
        ] {
            assert!(
                entry_for_anchor(&page, &anchor(href, text)).is_none(),
                "{} should be dropped",
                href
            );
        }
    }

    #[test]
    fn test_directory_and_file_entries() {
        let page = page();

        let dir = entry_for_anchor(&page, &anchor("Jazz%20Hits/", "Jazz Hits/")).unwrap();
        assert!(dir.is_directory);
        assert_eq!(dir.name, "Jazz Hits");
        assert_eq!(dir.source_id, "http://host/music/Jazz%20Hits/");

        let labelled = entry_for_anchor(&page, &anchor("live", "live/")).unwrap();
        assert!(labelled.is_directory);
        assert_eq!(labelled.source_id, "http://host/music/live/");

        let file = entry_for_anchor(&page, &anchor("/music/a.mp3", "a.mp3")).unwrap();
        assert!(!file.is_directory);
        assert_eq!(file.name, "a.mp3");

        // Header label pointing somewhere else is a real entry.
        let named = entry_for_anchor(&page, &anchor("name/", "Name")).unwrap();
        assert!(named.is_directory);
    }

    #[test]
    fn test_credentials_never_in_source_id() {
        let page = HttpSourceSpec::parse("http://u:p@host/music/").unwrap();
        let entry = entry_for_anchor(&page, &anchor("a.mp3", "a.mp3")).unwrap();
        assert_eq!(entry.source_id, "http://host/music/a.mp3");
    }
}
