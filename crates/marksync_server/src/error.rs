//! Error types for the sync server.

use marksync_protocol::{ErrorKind, ErrorResponse, ProtocolError, UserId};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, invalid or revoked credentials.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Account does not exist.
    #[error("unknown account: {0}")]
    UnknownAccount(UserId),

    /// The account's entry quota would be exceeded.
    #[error("quota exceeded: {stored} entries stored, limit {limit}")]
    QuotaExceeded {
        /// Entries currently stored.
        stored: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Request body could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotAuthorized(_)
                | ServerError::UnknownAccount(_)
                | ServerError::QuotaExceeded { .. }
                | ServerError::Codec(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Codec(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::UnknownAccount(_) => 404,
            ServerError::QuotaExceeded { .. } => 507,
            ServerError::Internal(_) => 500,
        }
    }

    /// Converts into the wire error body.
    pub fn to_response(&self) -> ErrorResponse {
        let kind = match self {
            ServerError::InvalidRequest(_) | ServerError::Codec(_) => ErrorKind::InvalidRequest,
            ServerError::NotAuthorized(_) => ErrorKind::NotAuthorized,
            ServerError::UnknownAccount(_) => ErrorKind::UnknownAccount,
            ServerError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            ServerError::Internal(_) => ErrorKind::Internal,
        };
        ErrorResponse::new(kind, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::QuotaExceeded { stored: 1, limit: 1 }.is_client_error());
    }

    #[test]
    fn error_response_kind() {
        let err = ServerError::NotAuthorized("device removed".into());
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.to_response().kind, ErrorKind::NotAuthorized);

        let err = ServerError::QuotaExceeded {
            stored: 10,
            limit: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert_eq!(err.to_response().kind, ErrorKind::QuotaExceeded);
    }
}
