//! Archive-relative source references.

use crate::error::{Result, SourceError};
use std::path::{Path, PathBuf};

const ARCHIVE_SCHEME: &str = "archive://";

/// A file inside a ZIP archive.
///
/// `entry_path` uses forward slashes and has no leading slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveSourceRef {
    archive_path: PathBuf,
    entry_path: String,
}

impl ArchiveSourceRef {
    pub fn new(archive_path: impl Into<PathBuf>, entry_path: &str) -> Self {
        Self {
            archive_path: archive_path.into(),
            entry_path: normalize_entry(entry_path),
        }
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    /// `archive://<enc-archive>#<enc-entry>`
    pub fn source_id(&self) -> String {
        format!(
            "{}{}#{}",
            ARCHIVE_SCHEME,
            urlencoding::encode(&self.archive_path.to_string_lossy()),
            urlencoding::encode(&self.entry_path)
        )
    }

    pub fn parse_source_id(id: &str) -> Result<Self> {
        let rest = id
            .strip_prefix(ARCHIVE_SCHEME)
            .ok_or_else(|| SourceError::InvalidLocator("not an archive source id".to_string()))?;
        let (archive, entry) = rest.split_once('#').ok_or_else(|| {
            SourceError::InvalidLocator("archive source id has no entry".to_string())
        })?;

        let archive = urlencoding::decode(archive)
            .map_err(|e| SourceError::InvalidLocator(format!("bad archive path: {}", e)))?;
        let entry = urlencoding::decode(entry)
            .map_err(|e| SourceError::InvalidLocator(format!("bad entry path: {}", e)))?;
        if archive.is_empty() || entry.is_empty() {
            return Err(SourceError::InvalidLocator(
                "archive source id is missing a component".to_string(),
            ));
        }
        Ok(Self::new(PathBuf::from(archive.as_ref()), &entry))
    }

    /// Split `<archive>.zip/<entry>` at the first `.zip` segment followed by
    /// more path. Does not touch the filesystem.
    pub fn split_logical_path(path: &str) -> Option<Self> {
        let mut offset = 0;
        for segment in path.split(['/', '\\']) {
            let end = offset + segment.len();
            if segment.len() > 4 && segment.to_ascii_lowercase().ends_with(".zip") {
                let entry = path.get(end + 1..).unwrap_or("");
                let entry = normalize_entry(entry);
                if !entry.is_empty() {
                    return Some(Self {
                        archive_path: PathBuf::from(&path[..end]),
                        entry_path: entry,
                    });
                }
            }
            offset = end + 1;
        }
        None
    }

    /// Display form: archive file name plus entry.
    pub fn display(&self) -> String {
        let name = self
            .archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}", name, self.entry_path)
    }
}

fn normalize_entry(entry: &str) -> String {
    entry
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}
