//! Channel error types.
//!
//! Per-frame failures never surface here: they are reported to the peer as
//! `ERROR_MESSAGE` envelopes (see [`crate::codec::DecodeError`]). These are
//! the errors an embedding application sees from lifecycle calls.

use crate::domain::config::ConfigError;
use crate::domain::state::ServerState;
use std::net::SocketAddr;

/// Channel-level errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Lifecycle operation called in the wrong state
    #[error("invalid server state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires
        expected: ServerState,
        /// State the server was in
        actual: ServerState,
    },

    /// Listening socket could not be bound
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Confidentiality provider could not be built
    #[error("crypto error: {0}")]
    Crypto(#[from] shared_crypto::CryptoError),

    /// Outbound envelope could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] crate::codec::EncodeError),

    /// Target connection is not registered
    #[error("unknown connection: {0}")]
    UnknownConnection(crate::domain::ConnectionId),

    /// Target connection refused the frame
    #[error("send failed: {0}")]
    Send(#[from] crate::ws::SendError),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = ChannelError::InvalidState {
            expected: ServerState::Stopped,
            actual: ServerState::Listening,
        };
        assert_eq!(
            err.to_string(),
            "invalid server state: expected stopped, found listening"
        );
    }

    #[test]
    fn test_bind_error_keeps_source() {
        use std::error::Error as _;
        let err = ChannelError::Bind {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: ChannelError = ConfigError::Invalid("bad".into()).into();
        assert_eq!(err.to_string(), "invalid configuration: bad");
    }
}
