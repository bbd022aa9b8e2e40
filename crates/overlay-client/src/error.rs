use std::path::PathBuf;

use thiserror::Error;
use transport::TransportError;

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

/// Failure kinds surfaced by the overlay client.
///
/// Per-node problems (`Timeout`, `Io` on a single probe) are normally absorbed
/// inside multi-node operations; they only reach callers when every node failed,
/// in which case the operation reports `NetworkUnreachable` instead.
#[derive(Error, Debug)]
pub enum OverlayError {
    /// Key material exists but cannot be used. Never repaired automatically.
    #[error("identity at {path} is corrupt: {reason}")]
    IdentityCorrupt { path: PathBuf, reason: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("provider {0} is unreachable")]
    ProviderUnreachable(String),

    #[error("search cancelled")]
    SearchCancelled,

    #[error("transfer cancelled")]
    TransferCancelled,

    #[error("operation cancelled")]
    Cancelled,

    #[error("content hash mismatch: expected {expected}, received {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("client shut down")]
    ShutDown,

    #[error("a download of {0} to this destination is already running")]
    TransferInProgress(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid content hash {0:?}")]
    InvalidContentHash(String),

    #[error("invalid display name {0:?}")]
    InvalidDisplayName(String),

    #[error("invalid public key {0:?}")]
    InvalidPublicKey(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OverlayError {
    /// True for the kinds produced when a caller aborted the operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::SearchCancelled | Self::TransferCancelled | Self::Cancelled
        )
    }
}

impl From<TransportError> for OverlayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidEndpoint { .. } | TransportError::UnsupportedScheme(_) => {
                Self::InvalidEndpoint(err.to_string())
            }
            TransportError::Timeout(target) => Self::Timeout(target),
            TransportError::Io(e) => Self::Io(e),
        }
    }
}
