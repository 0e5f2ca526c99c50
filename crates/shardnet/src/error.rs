//! Unified error type for the shardnet facade.

use shardnet_buffer::{BufferError, Cancelled};
use shardnet_protocol::{FramingError, ProtocolError};
use shardnet_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attributes let `?` convert sub-crate errors directly, so
/// code built on [`Connection`](crate::Connection) deals with this single
/// type.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Connect, I/O, or oversized-frame failure in the carrier.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The inbound byte stream lost packet boundaries.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Reading or building a single packet failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A ring-buffer cursor update was refused.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A wait was released by connection teardown.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("connection is not established")]
    NotConnected,

    #[error("connection is already established")]
    AlreadyConnected,

    /// The send buffer cannot take the whole message right now.
    #[error("send buffer full: {needed} bytes needed, {free} free")]
    SendBufferFull { needed: usize, free: usize },

    /// The injection buffer cannot take the whole message right now.
    #[error("injection buffer full: {needed} bytes needed, {free} free")]
    InjectBufferFull { needed: usize, free: usize },
}

/// Errors raised while loading a [`NetConfig`](crate::NetConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed network config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: NetError = TransportError::InvalidAddress("nowhere".into()).into();
        assert!(matches!(err, NetError::Transport(_)));
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_from_framing_error() {
        let err: NetError = FramingError::UnknownOpcode(0xEE).into();
        assert!(matches!(err, NetError::Framing(_)));
        assert!(err.to_string().contains("0xee"));
    }

    #[test]
    fn test_from_cancelled() {
        let err: NetError = Cancelled.into();
        assert!(matches!(err, NetError::Cancelled(_)));
    }

    #[test]
    fn test_send_buffer_full_message() {
        let err = NetError::SendBufferFull { needed: 10, free: 4 };
        assert_eq!(err.to_string(), "send buffer full: 10 bytes needed, 4 free");
    }
}
