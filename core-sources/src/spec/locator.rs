//! Locator classification.
//!
//! Turns raw user input into one of the supported source forms:
//! local file or directory, file inside a ZIP archive, HTTP(S), or SMB.

use crate::credentials::{CredentialScope, Credentials};
use crate::error::{Result, SourceError};
use crate::spec::{ArchiveSourceRef, HttpSourceSpec, SmbSourceSpec};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remote source of either protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSpec {
    Http(HttpSourceSpec),
    Smb(SmbSourceSpec),
}

impl RemoteSpec {
    pub fn source_id(&self) -> String {
        match self {
            RemoteSpec::Http(spec) => spec.source_id(),
            RemoteSpec::Smb(spec) => spec.source_id(),
        }
    }

    pub fn display_uri(&self) -> String {
        match self {
            RemoteSpec::Http(spec) => spec.display_uri(),
            RemoteSpec::Smb(spec) => spec.display_uri(),
        }
    }

    pub fn scheme(&self) -> &str {
        match self {
            RemoteSpec::Http(spec) => spec.scheme(),
            RemoteSpec::Smb(_) => "smb",
        }
    }

    pub fn scope(&self) -> CredentialScope {
        match self {
            RemoteSpec::Http(spec) => spec.scope(),
            RemoteSpec::Smb(spec) => spec.scope(),
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            RemoteSpec::Http(spec) => spec.credentials(),
            RemoteSpec::Smb(spec) => spec.credentials(),
        }
    }

    pub fn file_name(&self) -> Option<String> {
        match self {
            RemoteSpec::Http(spec) => spec.file_name(),
            RemoteSpec::Smb(spec) => spec.file_name(),
        }
    }

    pub fn is_directory(&self) -> bool {
        match self {
            RemoteSpec::Http(spec) => spec.is_directory(),
            RemoteSpec::Smb(spec) => spec.is_directory(),
        }
    }

    pub fn with_credentials(self, credentials: Credentials) -> Self {
        match self {
            RemoteSpec::Http(spec) => RemoteSpec::Http(spec.with_credentials(credentials)),
            RemoteSpec::Smb(spec) => RemoteSpec::Smb(spec.with_credentials(credentials)),
        }
    }
}

/// Classified locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    LocalFile(PathBuf),
    LocalDirectory(PathBuf),
    Archive(ArchiveSourceRef),
    Remote(RemoteSpec),
}

impl Locator {
    /// Credential-free identity used for recents and events.
    pub fn source_id(&self) -> String {
        match self {
            Locator::LocalFile(path) | Locator::LocalDirectory(path) => {
                path.to_string_lossy().into_owned()
            }
            Locator::Archive(r) => r.source_id(),
            Locator::Remote(spec) => spec.source_id(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Locator::LocalFile(path) | Locator::LocalDirectory(path) => {
                path.to_string_lossy().into_owned()
            }
            Locator::Archive(r) => r.display(),
            Locator::Remote(spec) => spec.display_uri(),
        }
    }

    pub fn is_directory(&self) -> bool {
        match self {
            Locator::LocalDirectory(_) => true,
            Locator::Remote(spec) => spec.is_directory(),
            _ => false,
        }
    }
}

/// Classifies raw input strings.
#[derive(Debug, Clone)]
pub struct LocatorClassifier {
    home: Option<PathBuf>,
}

impl Default for LocatorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LocatorClassifier {
    pub fn new() -> Self {
        Self {
            home: dirs::home_dir(),
        }
    }

    /// Override the directory `~` expands to.
    pub fn with_home(home: Option<PathBuf>) -> Self {
        Self { home }
    }

    pub fn classify(&self, input: &str) -> Result<Locator> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SourceError::InvalidLocator("empty locator".to_string()));
        }

        if let Some((scheme, _)) = input.split_once("://") {
            let scheme = scheme.to_ascii_lowercase();
            return match scheme.as_str() {
                "http" | "https" => Ok(Locator::Remote(RemoteSpec::Http(HttpSourceSpec::parse(
                    input,
                )?))),
                "smb" => Ok(Locator::Remote(RemoteSpec::Smb(SmbSourceSpec::parse(input)?))),
                "archive" => Ok(Locator::Archive(ArchiveSourceRef::parse_source_id(input)?)),
                "file" => {
                    let path = url::Url::parse(input)
                        .ok()
                        .and_then(|u| u.to_file_path().ok())
                        .ok_or_else(|| {
                            SourceError::InvalidLocator("malformed file:// URI".to_string())
                        })?;
                    self.classify_path(&path)
                }
                other => Err(SourceError::InvalidLocator(format!(
                    "unsupported scheme: {}",
                    other
                ))),
            };
        }

        let path = self.expand_home(input)?;
        self.classify_path(&path)
    }

    fn expand_home(&self, input: &str) -> Result<PathBuf> {
        let rest = match input.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => rest,
            _ => return Ok(PathBuf::from(input)),
        };
        let home = self
            .home
            .as_ref()
            .ok_or_else(|| SourceError::InvalidLocator("no home directory for ~".to_string()))?;
        Ok(home.join(rest.trim_start_matches(['/', '\\'])))
    }

    fn classify_path(&self, path: &Path) -> Result<Locator> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        if let Ok(meta) = std::fs::metadata(&path) {
            return Ok(if meta.is_dir() {
                Locator::LocalDirectory(path)
            } else {
                Locator::LocalFile(path)
            });
        }

        let logical = path.to_string_lossy();
        if let Some(archive) = ArchiveSourceRef::split_logical_path(&logical) {
            if archive.archive_path().is_file() {
                debug!(entry = archive.entry_path(), "Classified archive-relative path");
                return Ok(Locator::Archive(archive));
            }
        }

        Err(SourceError::InvalidLocator(format!(
            "no such file or directory: {}",
            core_runtime::logging::strip_path(&logical)
        )))
    }
}
