//! Error types for the engine crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::session::SessionId;
use protocol::ProtocolError;

/// Engine error type covering connection, transfer, and configuration
/// failures.
///
/// Per-connection failures never escape the engine's tasks; they are caught
/// at the task boundary and converted into events. The variants here are
/// what the *synchronous* operations (`start`, `bind`, `send`,
/// `begin_send_file`, `receive_file`) return to their caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The peer never completed the tag + key exchange; no session was
    /// created.
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// A cryptographic operation failed; the message was discarded but the
    /// session survives.
    #[error(transparent)]
    Crypto(#[from] ProtocolError),

    /// The connection dropped; the session is torn down and removed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// An operation referenced a session id that is not registered.
    #[error("no session with id {0}")]
    TargetNotFound(SessionId),

    /// `send` was called with no bound or connected target.
    #[error("no target bound")]
    NoTarget,

    /// A transfer was rejected before any socket was opened: missing source
    /// file or destination directory.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// A transfer chunk failed to decode mid-stream; the transfer was
    /// aborted and the partial output file left in place.
    #[error("transfer decode failed: {0}")]
    TransferCrypto(String),

    /// The operation needs the engine to be online.
    #[error("engine is offline")]
    Offline,

    /// Configuration could not be parsed or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying socket or file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_failure_display() {
        let err = EngineError::HandshakeFailure("bad tag".to_string());
        assert_eq!(err.to_string(), "handshake failed: bad tag");
    }

    #[test]
    fn test_target_not_found_display() {
        let err = EngineError::TargetNotFound(SessionId(7));
        assert_eq!(err.to_string(), "no session with id 7");
    }

    #[test]
    fn test_no_target_display() {
        assert_eq!(EngineError::NoTarget.to_string(), "no target bound");
    }

    #[test]
    fn test_crypto_error_is_transparent() {
        let err: EngineError = ProtocolError::Decryption("bad block".to_string()).into();
        assert_eq!(err.to_string(), "decryption failed: bad block");
    }

    #[test]
    fn test_from_config_error() {
        let err: EngineError = ConfigError::InvalidBacklog(0).into();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
    }
}
