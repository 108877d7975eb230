//! Error types for chute-core.

use thiserror::Error;

/// Main error type for chute operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation or malformed frame.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Compression or decompression failure.
    #[error("compression error: {message}")]
    Compression { message: String },

    /// Queue constructed with a zero capacity.
    #[error("queue capacity must be greater than zero")]
    InvalidCapacity,

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Transport layer error (connect or send failure).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Chunk store failure.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// File assembly failure.
    #[error("assembly error: {message}")]
    Assembly { message: String },
}

impl Error {
    /// Returns true if this error is transient and a retry may help.
    ///
    /// Transient errors are network-level failures where the peer may
    /// still be reachable on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::ConnectionClosed | Error::Timeout | Error::Io(_)
        )
    }
}

/// Convenience result type for chute operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_protocol() {
        let err = Error::Protocol {
            message: "bad chunk index".into(),
        };
        assert_eq!(err.to_string(), "protocol error: bad chunk index");
    }

    #[test]
    fn error_display_invalid_capacity() {
        assert_eq!(
            Error::InvalidCapacity.to_string(),
            "queue capacity must be greater than zero"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn transient_errors() {
        assert!(Error::Transport {
            message: "connection refused".into()
        }
        .is_transient());
        assert!(Error::ConnectionClosed.is_transient());
        assert!(Error::Timeout.is_transient());

        // These should not be transient
        assert!(!Error::Protocol {
            message: "bad".into()
        }
        .is_transient());
        assert!(!Error::InvalidCapacity.is_transient());
        assert!(!Error::Assembly {
            message: "truncated".into()
        }
        .is_transient());
    }
}
