/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The remote refused, timed out, failed DNS, or rejected the
    /// WebSocket upgrade.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The address could not be parsed for the selected carrier.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// An operation was attempted before `connect` or after `disconnect`.
    #[error("transport is not connected")]
    NotConnected,

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// A single WebSocket frame did not fit under the receive ceiling.
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    /// The operation was abandoned because its cancellation token fired.
    #[error("transport operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether this error is the deliberate cancellation outcome rather than
    /// a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
