//! # Source Error Types
//!
//! Closed error taxonomy for locator classification, transfers, cache
//! integrity and playback validation. Protocol failures carry structured
//! variants so the open coordinator can decide on an auth prompt without
//! inspecting message text.

use bridge_traits::{BridgeError, SmbError};
use std::fmt;
use thiserror::Error;

/// `STATUS_ACCESS_DENIED`
pub const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;
/// `STATUS_OBJECT_NAME_NOT_FOUND`
pub const STATUS_OBJECT_NAME_NOT_FOUND: u32 = 0xC000_0034;
/// `STATUS_OBJECT_PATH_NOT_FOUND`
pub const STATUS_OBJECT_PATH_NOT_FOUND: u32 = 0xC000_003A;
/// `STATUS_WRONG_PASSWORD`
pub const STATUS_WRONG_PASSWORD: u32 = 0xC000_006A;
/// `STATUS_LOGON_FAILURE`
pub const STATUS_LOGON_FAILURE: u32 = 0xC000_006D;
/// `STATUS_ACCOUNT_RESTRICTION`
pub const STATUS_ACCOUNT_RESTRICTION: u32 = 0xC000_006E;
/// `STATUS_PASSWORD_EXPIRED`
pub const STATUS_PASSWORD_EXPIRED: u32 = 0xC000_0071;
/// `STATUS_ACCOUNT_DISABLED`
pub const STATUS_ACCOUNT_DISABLED: u32 = 0xC000_0072;
/// `STATUS_BAD_NETWORK_NAME`
pub const STATUS_BAD_NETWORK_NAME: u32 = 0xC000_00CC;

/// Structured HTTP failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFailure {
    /// Final response was not a success status.
    Status { status: u16 },
    /// Redirect response without a usable `Location`.
    Redirect { status: u16 },
    /// Redirect chain longer than the configured limit.
    TooManyRedirects,
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpFailure::Status { status } => write!(f, "HTTP {}", status),
            HttpFailure::Redirect { status } => {
                write!(f, "HTTP {} redirect without a usable Location", status)
            }
            HttpFailure::TooManyRedirects => write!(f, "HTTP too many redirects"),
        }
    }
}

/// Structured SMB failure derived from an NT status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbFailure {
    WrongPassword,
    AccessDenied,
    AccountRestricted,
    Unknown { status: u32 },
}

impl SmbFailure {
    pub fn from_status(status: u32) -> Self {
        match status {
            STATUS_LOGON_FAILURE | STATUS_WRONG_PASSWORD => SmbFailure::WrongPassword,
            STATUS_ACCESS_DENIED => SmbFailure::AccessDenied,
            STATUS_ACCOUNT_RESTRICTION | STATUS_ACCOUNT_DISABLED | STATUS_PASSWORD_EXPIRED => {
                SmbFailure::AccountRestricted
            }
            other => SmbFailure::Unknown { status: other },
        }
    }
}

impl fmt::Display for SmbFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmbFailure::WrongPassword => write!(f, "SMB logon failure (wrong user name or password)"),
            SmbFailure::AccessDenied => write!(f, "SMB access denied"),
            SmbFailure::AccountRestricted => write!(f, "SMB account restricted"),
            SmbFailure::Unknown { status } => match status_name(*status) {
                Some(name) => write!(f, "SMB {} (0x{:08X})", name, status),
                None => write!(f, "SMB status 0x{:08X}", status),
            },
        }
    }
}

fn status_name(status: u32) -> Option<&'static str> {
    match status {
        STATUS_OBJECT_NAME_NOT_FOUND => Some("file not found"),
        STATUS_OBJECT_PATH_NOT_FOUND => Some("path not found"),
        STATUS_BAD_NETWORK_NAME => Some("share not found"),
        _ => None,
    }
}

/// Coarse category used for UI messaging and event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Classification,
    Transport,
    Integrity,
    Validation,
    Cancellation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Classification => "classification",
            ErrorKind::Transport => "transport",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors that can occur while resolving, fetching or caching a source.
#[derive(Error, Debug)]
pub enum SourceError {
    // ========================================================================
    // Classification
    // ========================================================================
    /// Input is not a recognised locator form.
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    // ========================================================================
    // Transport
    // ========================================================================
    #[error("{failure}")]
    Http { failure: HttpFailure },

    #[error("{failure}")]
    Smb { failure: SmbFailure },

    /// Connection-level failure (DNS, refused, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // ========================================================================
    // Integrity
    // ========================================================================
    /// Archive entry would be written outside the mount root.
    #[error("Archive entry escapes mount root: {entry}")]
    ArchiveEscape { entry: String },

    #[error("Archive has too many entries (limit {limit})")]
    ArchiveTooManyEntries { limit: usize },

    #[error("Archive entry {entry} exceeds {limit} bytes")]
    ArchiveEntryTooLarge { entry: String, limit: u64 },

    #[error("Archive exceeds {limit} bytes uncompressed")]
    ArchiveTooLarge { limit: u64 },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Download produced no data")]
    EmptyDownload,

    // ========================================================================
    // Validation
    // ========================================================================
    /// File was obtained but the engine found nothing playable in it.
    #[error("Opened but not playable: {0}")]
    Unplayable(String),

    // ========================================================================
    // Cancellation
    // ========================================================================
    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // Internal
    // ========================================================================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bridge error: {0}")]
    Bridge(BridgeError),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),
}

impl SourceError {
    /// Whether the failure should lead to a credential prompt.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            SourceError::Http {
                failure: HttpFailure::Status { status },
            } => matches!(status, 401 | 403),
            SourceError::Smb { failure } => matches!(
                failure,
                SmbFailure::WrongPassword | SmbFailure::AccessDenied | SmbFailure::AccountRestricted
            ),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::InvalidLocator(_) => ErrorKind::Classification,
            SourceError::Http { .. }
            | SourceError::Smb { .. }
            | SourceError::Transport(_)
            | SourceError::Timeout(_) => ErrorKind::Transport,
            SourceError::ArchiveEscape { .. }
            | SourceError::ArchiveTooManyEntries { .. }
            | SourceError::ArchiveEntryTooLarge { .. }
            | SourceError::ArchiveTooLarge { .. }
            | SourceError::Archive(_)
            | SourceError::EmptyDownload => ErrorKind::Integrity,
            SourceError::Unplayable(_) => ErrorKind::Validation,
            SourceError::Cancelled => ErrorKind::Cancellation,
            SourceError::Cache(_)
            | SourceError::Io(_)
            | SourceError::Bridge(_)
            | SourceError::Config(_) => ErrorKind::Internal,
        }
    }

    /// User-facing reason naming the transport and status where there is one.
    pub fn failure_reason(&self) -> String {
        self.to_string()
    }

    pub(crate) fn archive(err: zip::result::ZipError) -> Self {
        SourceError::Archive(err.to_string())
    }
}

impl From<BridgeError> for SourceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(msg) => SourceError::Timeout(msg),
            BridgeError::ConnectionFailed(msg) => SourceError::Transport(msg),
            other => SourceError::Bridge(other),
        }
    }
}

impl From<SmbError> for SourceError {
    fn from(err: SmbError) -> Self {
        match err {
            SmbError::Status(status) => SourceError::Smb {
                failure: SmbFailure::from_status(status),
            },
            SmbError::Connection(msg) => SourceError::Transport(format!("SMB: {}", msg)),
            SmbError::Transport(msg) => SourceError::Transport(format!("SMB: {}", msg)),
        }
    }
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
