//! Error types for dirpipe core operations.

use std::time::Duration;
use thiserror::Error;

/// Core error type shared by queues, channels, pipes and the wire protocol.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a closed channel or queue, or on an uninitialized queue.
    #[error("invalid state: {message}")]
    State {
        /// Error message.
        message: String,
    },

    /// A blocking operation exceeded its deadline.
    #[error("operation timed out after {elapsed:?}")]
    Timeout {
        /// Time spent waiting before giving up.
        elapsed: Duration,
    },

    /// A blocking operation was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed request or response.
    #[error("parse error: {message}")]
    Parse {
        /// Error message.
        message: String,
    },

    /// No pipe type is supported by both parties.
    #[error("no acceptable pipe type among {offered:?}")]
    Negotiation {
        /// Pipe type names offered by the requesting side.
        offered: Vec<String>,
    },

    /// Write into a channel whose reader has closed.
    #[error("channel closed by peer")]
    ChannelClosed,
}

impl Error {
    /// Creates a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Returns true for [`Error::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true for [`Error::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Recovers a typed error from an `io::Error` produced by [`From<Error>`].
    ///
    /// Plain IO errors come back as [`Error::Io`].
    #[must_use]
    pub fn from_io(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(typed)) => *typed,
            Some(Err(other)) => Self::Io(std::io::Error::new(kind, other)),
            None => Self::Io(kind.into()),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err {
            Error::Io(io) => return io,
            Error::State { .. } => ErrorKind::Other,
            Error::Timeout { .. } => ErrorKind::TimedOut,
            // std retries `Interrupted` inside `read_to_end` and `write_all`.
            Error::Cancelled => ErrorKind::Other,
            Error::Parse { .. } => ErrorKind::InvalidData,
            Error::Negotiation { .. } => ErrorKind::Unsupported,
            Error::ChannelClosed => ErrorKind::BrokenPipe,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result type alias for dirpipe core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_io_conversion_keeps_kind() {
        let io: std::io::Error = Error::Timeout {
            elapsed: Duration::from_millis(300),
        }
        .into();
        assert_eq!(io.kind(), ErrorKind::TimedOut);

        let io: std::io::Error = Error::ChannelClosed.into();
        assert_eq!(io.kind(), ErrorKind::BrokenPipe);

        let io: std::io::Error = Error::Cancelled.into();
        assert_ne!(io.kind(), ErrorKind::Interrupted);
        assert!(Error::from_io(io).is_cancelled());
    }

    #[test]
    fn test_from_io_recovers_typed_error() {
        let io: std::io::Error = Error::parse("bad header").into();
        match Error::from_io(io) {
            Error::Parse { message } => assert_eq!(message, "bad header"),
            other => panic!("unexpected error: {other:?}"),
        }

        let plain = std::io::Error::new(ErrorKind::NotFound, "gone");
        assert!(matches!(Error::from_io(plain), Error::Io(_)));
    }

    #[test]
    fn test_error_display() {
        let err = Error::state("queue not initialized");
        assert_eq!(err.to_string(), "invalid state: queue not initialized");
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_timeout());
    }
}
