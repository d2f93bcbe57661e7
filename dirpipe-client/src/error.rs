//! Error types for client operations.

use dirpipe_core::Status;
use thiserror::Error;

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipe, channel or protocol error.
    #[error("pipe error: {0}")]
    Pipe(#[from] dirpipe_core::Error),

    /// The server answered with a failure status.
    #[error("connection rejected ({status}): {message}")]
    Rejected {
        /// Status sent by the server.
        status: Status,
        /// Text sent with the status.
        message: String,
    },

    /// The address names no connect directory.
    #[error("invalid address '{address}'")]
    InvalidAddress {
        /// The address as given.
        address: String,
    },
}

impl ClientError {
    /// Returns true if a wait exceeded its deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Pipe(e) if e.is_timeout())
    }

    /// Returns true if the wait was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Pipe(e) if e.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Rejected {
            status: Status::InternalError,
            message: "no acceptable pipe type".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connection rejected (500 Internal error): no acceptable pipe type"
        );
        assert!(!err.is_timeout());
        assert!(ClientError::from(dirpipe_core::Error::Cancelled).is_cancelled());
    }
}
