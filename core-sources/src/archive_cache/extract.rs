//! ZIP extraction with path and size guards.

use crate::error::{Result, SourceError};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::ZipArchive;

const MIB: u64 = 1024 * 1024;

/// Hard bounds applied while extracting one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    pub max_entries: usize,
    /// Per entry, checked against the declared and the actually-read size
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 20_000,
            max_entry_bytes: 256 * MIB,
            max_total_bytes: 1024 * MIB,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExtractSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Relative path for an archive entry name, or `None` if it could land
/// outside the extraction root.
///
/// Backslashes count as separators. Absolute paths, drive prefixes and any
/// `..` component are rejected outright rather than stripped. Colons elsewhere
/// are ordinary name characters.
pub(crate) fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut out = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// `C:` style drive letter at the start of the first component.
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Extract every entry of `archive` below `dest`, which must exist.
///
/// Runs on a blocking thread. Stops at the first violation; the caller owns
/// cleanup of `dest`.
pub(crate) fn extract_archive(
    archive: &Path,
    dest: &Path,
    limits: ExtractLimits,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<ExtractSummary> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(SourceError::archive)?;
    if zip.len() > limits.max_entries {
        return Err(SourceError::ArchiveTooManyEntries {
            limit: limits.max_entries,
        });
    }

    let root = dest.canonicalize()?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut summary = ExtractSummary::default();

    for idx in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let mut entry = zip.by_index(idx).map_err(SourceError::archive)?;
        let name = entry.name().to_string();
        let relative = sanitize_entry_path(&name)
            .ok_or_else(|| SourceError::ArchiveEscape { entry: name.clone() })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = root.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            ensure_within(&root, &out_path, &name)?;
            continue;
        }

        if entry.size() > limits.max_entry_bytes {
            return Err(SourceError::ArchiveEntryTooLarge {
                entry: name,
                limit: limits.max_entry_bytes,
            });
        }

        let parent = out_path.parent().unwrap_or(&root);
        fs::create_dir_all(parent)?;
        ensure_within(&root, parent, &name)?;

        let mut out = File::create(&out_path)?;
        let mut written: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            written += n as u64;
            summary.bytes += n as u64;
            if written > limits.max_entry_bytes {
                return Err(SourceError::ArchiveEntryTooLarge {
                    entry: name,
                    limit: limits.max_entry_bytes,
                });
            }
            if summary.bytes > limits.max_total_bytes {
                return Err(SourceError::ArchiveTooLarge {
                    limit: limits.max_total_bytes,
                });
            }
            out.write_all(&buf[..n])?;
        }
        out.flush()?;
        summary.files += 1;
    }

    debug!(files = summary.files, bytes = summary.bytes, "Archive extracted");
    Ok(summary)
}

/// Canonical form of `path` must stay under `root`.
fn ensure_within(root: &Path, path: &Path, entry: &str) -> Result<()> {
    let canonical = path.canonicalize()?;
    if canonical.starts_with(root) {
        Ok(())
    } else {
        Err(SourceError::ArchiveEscape {
            entry: entry.to_string(),
        })
    }
}
