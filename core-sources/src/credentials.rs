//! Session credential cache.
//!
//! Credentials entered at an auth prompt are remembered for the rest of the
//! session under `host+share` and under `host` alone, so a second share or a
//! second file on the same server does not prompt again.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::SmbAuth;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// User name and password, optionally with an SMB domain.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Base64 `user:password` for an `Authorization: Basic` header.
    pub fn basic_auth(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.username, self.password))
    }

    pub fn to_smb_auth(&self) -> SmbAuth {
        SmbAuth::Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            domain: self.domain.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Key under which credentials are remembered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialScope {
    pub host: String,
    pub share: Option<String>,
}

impl CredentialScope {
    pub fn host(host: impl AsRef<str>) -> Self {
        Self {
            host: host.as_ref().to_ascii_lowercase(),
            share: None,
        }
    }

    pub fn share(host: impl AsRef<str>, share: impl AsRef<str>) -> Self {
        Self {
            host: host.as_ref().to_ascii_lowercase(),
            share: Some(share.as_ref().to_ascii_lowercase()),
        }
    }

    /// The host-level fallback key.
    pub fn host_only(&self) -> Self {
        Self {
            host: self.host.clone(),
            share: None,
        }
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.share {
            Some(share) => write!(f, "{}/{}", self.host, share),
            None => f.write_str(&self.host),
        }
    }
}

/// Store consulted before every remote attempt.
pub trait CredentialStore: Send + Sync {
    /// Exact scope first, then the host-only fallback.
    fn lookup(&self, scope: &CredentialScope) -> Option<Credentials>;

    fn remember(&self, scope: &CredentialScope, credentials: Credentials);

    /// Drop every entry for `host`.
    fn forget(&self, host: &str);
}

/// Process-scoped in-memory [`CredentialStore`].
#[derive(Default)]
pub struct SessionCredentialStore {
    entries: RwLock<HashMap<CredentialScope, Credentials>>,
}

impl SessionCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CredentialStore for SessionCredentialStore {
    fn lookup(&self, scope: &CredentialScope) -> Option<Credentials> {
        let entries = self.entries.read();
        entries
            .get(scope)
            .or_else(|| entries.get(&scope.host_only()))
            .cloned()
    }

    fn remember(&self, scope: &CredentialScope, credentials: Credentials) {
        let mut entries = self.entries.write();
        if scope.share.is_some() {
            entries.insert(scope.clone(), credentials.clone());
        }
        entries.insert(scope.host_only(), credentials);
    }

    fn forget(&self, host: &str) {
        let host = host.to_ascii_lowercase();
        self.entries.write().retain(|scope, _| scope.host != host);
    }
}

impl fmt::Debug for SessionCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentialStore")
            .field("entries", &self.len())
            .finish()
    }
}
