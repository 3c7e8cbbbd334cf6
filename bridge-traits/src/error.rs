use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` when the host could not reach the remote endpoint at all.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionFailed(_) | BridgeError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
