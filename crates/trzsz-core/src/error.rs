//! Error types for trzsz-core.

use thiserror::Error;

/// Main error type for trzsz operations.
#[derive(Debug, Error)]
pub enum TrzszError {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transfer was stopped by the local user.
    #[error("Stopped")]
    Cancelled,

    /// A frame read timed out waiting for the peer.
    #[error("Receive data timeout")]
    Timeout,

    /// Protocol violation or malformed frame.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A chunk or whole-file digest did not match.
    #[error("md5 mismatch @{offset}")]
    ChecksumMismatch { offset: u64 },

    /// A source or destination path is unusable.
    #[error("{message}")]
    Path { message: String },

    /// The peer replied with a `FAIL` frame.
    #[error("{0}")]
    Fail(String),

    /// The peer reported an error via an `ERR` frame.
    #[error("{message}")]
    Remote {
        kind: String,
        message: String,
        trace: bool,
    },

    /// An unexpected panic caught at a task boundary.
    #[error("panic: {trace}")]
    Panic { trace: String },
}

impl TrzszError {
    pub fn protocol(message: impl Into<String>) -> Self {
        TrzszError::Protocol {
            message: message.into(),
        }
    }

    pub fn path(message: impl Into<String>) -> Self {
        TrzszError::Path {
            message: message.into(),
        }
    }

    /// Returns true if this error originated on the remote side, in which
    /// case it must not be echoed back over the wire.
    pub fn is_remote(&self) -> bool {
        matches!(self, TrzszError::Fail(_) | TrzszError::Remote { .. })
    }

    /// Returns true if the error carries a diagnostic trace rather than a
    /// plain user-facing message.
    pub fn is_traced(&self) -> bool {
        matches!(self, TrzszError::Panic { .. })
            || matches!(self, TrzszError::Remote { trace: true, .. })
    }

    /// The error kind name sent in `ERR` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            TrzszError::Io(_) => "IoError",
            TrzszError::Cancelled => "Stopped",
            TrzszError::Timeout => "Timeout",
            TrzszError::Protocol { .. } => "ProtocolMismatch",
            TrzszError::ChecksumMismatch { .. } => "CrcMismatch",
            TrzszError::Path { .. } => "PathError",
            TrzszError::Fail(_) | TrzszError::Remote { .. } => "RemoteError",
            TrzszError::Panic { .. } => "Panic",
        }
    }

    /// The single line shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            TrzszError::Cancelled => "Stopped".to_string(),
            other => other.to_string(),
        }
    }
}

/// Convenience result type for trzsz operations.
pub type Result<T> = std::result::Result<T, TrzszError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_checksum() {
        let err = TrzszError::ChecksumMismatch { offset: 8192 };
        assert_eq!(err.to_string(), "md5 mismatch @8192");
    }

    #[test]
    fn error_display_cancelled() {
        assert_eq!(TrzszError::Cancelled.to_string(), "Stopped");
        assert_eq!(TrzszError::Cancelled.user_message(), "Stopped");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TrzszError = io_err.into();
        assert!(matches!(err, TrzszError::Io(_)));
    }

    #[test]
    fn remote_errors_are_not_echoed() {
        assert!(TrzszError::Fail("md5 mismatch @0".into()).is_remote());
        assert!(TrzszError::Remote {
            kind: "Stopped".into(),
            message: "interrupted".into(),
            trace: false,
        }
        .is_remote());

        assert!(!TrzszError::Cancelled.is_remote());
        assert!(!TrzszError::Timeout.is_remote());
    }

    #[test]
    fn traced_errors() {
        assert!(TrzszError::Panic {
            trace: "stack".into()
        }
        .is_traced());
        assert!(!TrzszError::Cancelled.is_traced());
        assert!(!TrzszError::Path {
            message: "no such file".into()
        }
        .is_traced());
    }

    #[test]
    fn kind_names() {
        assert_eq!(TrzszError::Cancelled.kind(), "Stopped");
        assert_eq!(TrzszError::Timeout.kind(), "Timeout");
        assert_eq!(
            TrzszError::ChecksumMismatch { offset: 0 }.kind(),
            "CrcMismatch"
        );
    }
}
