//! SMB Client Abstraction
//!
//! Hosts provide an SMB2/3 transport; the core decides which authentication
//! attempts to make, maps NT status codes to user-facing outcomes, and drives
//! listing and streaming through the session returned here.

use async_trait::async_trait;
use thiserror::Error;

use crate::platform::DynAsyncRead;

/// `FILE_ATTRIBUTE_DIRECTORY` as reported in SMB directory queries.
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;

/// Share type values reported by `NetShareEnum` (`STYPE_*`).
pub const STYPE_DISKTREE: u32 = 0x0000_0000;
pub const STYPE_PRINTQ: u32 = 0x0000_0001;
pub const STYPE_DEVICE: u32 = 0x0000_0002;
pub const STYPE_IPC: u32 = 0x0000_0003;
/// Mask selecting the base share type (drops `STYPE_SPECIAL`/`STYPE_TEMPORARY`).
pub const STYPE_MASK: u32 = 0x0FFF_FFFF;

/// Authentication attempt presented to the server during session setup.
#[derive(Clone, PartialEq, Eq)]
pub enum SmbAuth {
    Credentials {
        username: String,
        password: String,
        domain: Option<String>,
    },
    Anonymous,
    Guest,
}

impl SmbAuth {
    /// Short label safe for logging.
    pub fn label(&self) -> &'static str {
        match self {
            SmbAuth::Credentials { .. } => "credentials",
            SmbAuth::Anonymous => "anonymous",
            SmbAuth::Guest => "guest",
        }
    }
}

impl std::fmt::Debug for SmbAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmbAuth::Credentials {
                username, domain, ..
            } => f
                .debug_struct("Credentials")
                .field("username", username)
                .field("domain", domain)
                .field("password", &"[REDACTED]")
                .finish(),
            SmbAuth::Anonymous => f.write_str("Anonymous"),
            SmbAuth::Guest => f.write_str("Guest"),
        }
    }
}

/// Errors surfaced by an SMB transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmbError {
    /// Server answered with a non-success NT status.
    #[error("SMB status 0x{0:08X}")]
    Status(u32),

    /// Connection-level failure (DNS, TCP, negotiate).
    #[error("SMB connection failed: {0}")]
    Connection(String),

    /// Any other transport problem.
    #[error("SMB transport error: {0}")]
    Transport(String),
}

/// Share advertised by a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbShareInfo {
    pub name: String,
    pub share_type: u32,
}

impl SmbShareInfo {
    /// Returns `true` for plain disk shares (not printers, IPC, or devices).
    pub fn is_disk(&self) -> bool {
        self.share_type & STYPE_MASK == STYPE_DISKTREE
    }
}

/// Entry returned by a directory query inside a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbDirEntry {
    pub name: String,
    pub attributes: u32,
    pub size: u64,
}

impl SmbDirEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

/// Remote file opened for sequential reading.
pub struct SmbFile {
    pub size: Option<u64>,
    pub reader: Box<DynAsyncRead>,
}

impl std::fmt::Debug for SmbFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbFile")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Authenticated session against one host.
#[async_trait]
pub trait SmbSession: Send + Sync {
    /// Enumerate the shares exposed by the host.
    async fn list_shares(&self) -> Result<Vec<SmbShareInfo>, SmbError>;

    /// List a directory inside `share`. `path` uses forward slashes and is
    /// relative to the share root (`""` or `"/"` is the root).
    async fn list_directory(&self, share: &str, path: &str) -> Result<Vec<SmbDirEntry>, SmbError>;

    /// Open a file inside `share` for reading.
    async fn open_file(&self, share: &str, path: &str) -> Result<SmbFile, SmbError>;
}

/// Factory for SMB sessions.
#[async_trait]
pub trait SmbTransport: Send + Sync {
    /// Negotiate and set up a session with a single authentication attempt.
    async fn connect(
        &self,
        host: &str,
        port: Option<u16>,
        auth: &SmbAuth,
    ) -> Result<Box<dyn SmbSession>, SmbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_attribute_bit() {
        let dir = SmbDirEntry {
            name: "Albums".into(),
            attributes: FILE_ATTRIBUTE_DIRECTORY | 0x20,
            size: 0,
        };
        let file = SmbDirEntry {
            name: "track.flac".into(),
            attributes: 0x20,
            size: 1024,
        };
        assert!(dir.is_directory());
        assert!(!file.is_directory());
    }

    #[test]
    fn test_disk_share_filter() {
        let share = |share_type| SmbShareInfo {
            name: "x".into(),
            share_type,
        };
        assert!(share(STYPE_DISKTREE).is_disk());
        assert!(share(STYPE_DISKTREE | 0x8000_0000).is_disk());
        assert!(!share(STYPE_IPC | 0x8000_0000).is_disk());
        assert!(!share(STYPE_PRINTQ).is_disk());
        assert!(!share(STYPE_DEVICE).is_disk());
    }

    #[test]
    fn test_auth_debug_hides_password() {
        let auth = SmbAuth::Credentials {
            username: "alice".into(),
            password: "hunter2".into(),
            domain: None,
        };
        let printed = format!("{:?}", auth);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
        assert_eq!(auth.label(), "credentials");
    }
}
