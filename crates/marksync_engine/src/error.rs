//! Error types for the sync engine.

use marksync_protocol::{EntryKey, ErrorKind, ErrorResponse, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The shared log rejected this device's credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A remote update references an object that does not exist locally.
    #[error("integration conflict: {operation} of {collection}/{pk} from {key} has no local object")]
    IntegrationConflict {
        /// Collection name.
        collection: String,
        /// Primary key.
        pk: String,
        /// Kind of the conflicting operation.
        operation: marksync_protocol::Operation,
        /// Entry that could not be applied.
        key: EntryKey,
    },

    /// The account's storage quota on the shared log is exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// No device joined the pairing session in time.
    #[error("pairing timed out after {0:?}")]
    PairingTimeout(Duration),

    /// The pairing code is unknown, expired, malformed or already used.
    #[error("invalid pairing code: {0}")]
    PairingCodeInvalid(String),

    /// The other side refused to pair.
    #[error("pairing rejected: {0}")]
    PairingRejected(String),

    /// The local monotonic counter cannot advance any further.
    #[error("local clock counter overflow")]
    ClockOverflow,

    /// Domain storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Settings persistence error.
    #[error("settings error: {0}")]
    Settings(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with something that violates the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server failed internally.
    #[error("server error: {0}")]
    Server(String),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The device has no credentials for a shared log yet.
    #[error("device is not paired with an account")]
    NotPaired,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Server(_) => true,
            _ => false,
        }
    }

    /// Returns true if continuous sync should pause until the user acts.
    pub fn pauses_continuous_sync(&self) -> bool {
        matches!(self, SyncError::QuotaExceeded(_) | SyncError::Auth(_))
    }
}

impl From<ErrorResponse> for SyncError {
    fn from(response: ErrorResponse) -> Self {
        match response.kind {
            ErrorKind::NotAuthorized | ErrorKind::UnknownAccount => SyncError::Auth(response.message),
            ErrorKind::QuotaExceeded => SyncError::QuotaExceeded(response.message),
            ErrorKind::InvalidRequest => SyncError::Protocol(response.message),
            ErrorKind::Internal => SyncError::Server(response.message),
        }
    }
}
