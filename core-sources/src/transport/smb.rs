//! SMB session setup with ordered authentication attempts.

use crate::error::{Result, SourceError};
use crate::spec::SmbSourceSpec;
use bridge_traits::{SmbAuth, SmbError, SmbSession, SmbTransport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Opens sessions trying explicit credentials, then anonymous, then guest.
///
/// The first attempt that succeeds wins. Connection-level failures end the
/// sequence immediately since another identity will not help. When every
/// attempt is refused, the status of the first attempt is reported.
#[derive(Clone)]
pub struct SmbConnector {
    transport: Arc<dyn SmbTransport>,
}

impl SmbConnector {
    pub fn new(transport: Arc<dyn SmbTransport>) -> Self {
        Self { transport }
    }

    pub fn auth_attempts(spec: &SmbSourceSpec) -> Vec<SmbAuth> {
        let mut attempts = Vec::with_capacity(3);
        if let Some(creds) = spec.credentials() {
            attempts.push(creds.to_smb_auth());
        }
        attempts.push(SmbAuth::Anonymous);
        attempts.push(SmbAuth::Guest);
        attempts
    }

    #[instrument(skip(self, spec, cancel), fields(host = %spec.host()))]
    pub async fn connect(
        &self,
        spec: &SmbSourceSpec,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn SmbSession>> {
        let mut first_refusal: Option<SmbError> = None;

        for auth in Self::auth_attempts(spec) {
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                res = self.transport.connect(spec.host(), spec.port(), &auth) => res,
            };

            match attempt {
                Ok(session) => {
                    debug!(auth = auth.label(), "SMB session established");
                    return Ok(session);
                }
                Err(SmbError::Status(status)) => {
                    debug!(
                        auth = auth.label(),
                        status = %format!("0x{:08X}", status),
                        "SMB session refused"
                    );
                    first_refusal.get_or_insert(SmbError::Status(status));
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(first_refusal.map(SourceError::from).unwrap_or_else(|| {
            SourceError::Transport("SMB: no authentication attempts".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::error::STATUS_LOGON_FAILURE;
    use async_trait::async_trait;
    use bridge_traits::{SmbDirEntry, SmbFile, SmbShareInfo};
    use parking_lot::Mutex;

    struct NoopSession;

    #[async_trait]
    impl SmbSession for NoopSession {
        async fn list_shares(&self) -> std::result::Result<Vec<SmbShareInfo>, SmbError> {
            Ok(Vec::new())
        }
        async fn list_directory(
            &self,
            _share: &str,
            _path: &str,
        ) -> std::result::Result<Vec<SmbDirEntry>, SmbError> {
            Ok(Vec::new())
        }
        async fn open_file(&self, _share: &str, _path: &str) -> std::result::Result<SmbFile, SmbError> {
            Err(SmbError::Status(0xC000_0034))
        }
    }

    /// Accepts only the listed auth labels; records every attempt.
    struct Gatekeeper {
        accept: &'static [&'static str],
        attempts: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl SmbTransport for Gatekeeper {
        async fn connect(
            &self,
            _host: &str,
            _port: Option<u16>,
            auth: &SmbAuth,
        ) -> std::result::Result<Box<dyn SmbSession>, SmbError> {
            self.attempts.lock().push(auth.label());
            if self.accept.contains(&auth.label()) {
                Ok(Box::new(NoopSession))
            } else {
                Err(SmbError::Status(STATUS_LOGON_FAILURE))
            }
        }
    }

    #[test]
    fn test_attempt_order() {
        let spec = SmbSourceSpec::parse("smb://nas/share")
            .unwrap()
            .with_credentials(Credentials::new("a", "b"));
        let labels: Vec<_> = SmbConnector::auth_attempts(&spec)
            .iter()
            .map(SmbAuth::label)
            .collect();
        assert_eq!(labels, vec!["credentials", "anonymous", "guest"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_guest() {
        let transport = Arc::new(Gatekeeper {
            accept: &["guest"],
            attempts: Mutex::new(Vec::new()),
        });
        let connector = SmbConnector::new(transport.clone());
        let spec = SmbSourceSpec::parse("smb://nas/share").unwrap();

        assert!(connector.connect(&spec, &CancellationToken::new()).await.is_ok());
        assert_eq!(*transport.attempts.lock(), vec!["anonymous", "guest"]);
    }

    #[tokio::test]
    async fn test_all_refused_is_auth_failure() {
        let transport = Arc::new(Gatekeeper {
            accept: &[],
            attempts: Mutex::new(Vec::new()),
        });
        let connector = SmbConnector::new(transport);
        let spec = SmbSourceSpec::parse("smb://nas/share").unwrap();

        let err = connector
            .connect(&spec, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(err.is_auth_failure());
    }
}
