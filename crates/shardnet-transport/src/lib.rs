//! Transport abstraction layer for shardnet.
//!
//! Provides the [`Transport`] trait, a uniform non-blocking contract over
//! two physically different carriers:
//!
//! - [`TcpTransport`]: raw stream socket. `send`/`receive` boundaries mean
//!   nothing; the peer sees one byte stream.
//! - [`WebSocketTransport`]: message-framed carrier. The TCP connection is
//!   upgraded once, and afterwards every `send` is one binary frame.
//!
//! [`Carrier`] is the closed set of both, picked at connect time from the
//! address scheme.
//!
//! Every suspending call takes a [`CancellationToken`]; cancelling it makes
//! the call return [`TransportError::Cancelled`] within one I/O operation.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use tcp::TcpTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

pub use tokio_util::sync::CancellationToken;

/// Default ceiling for a single WebSocket frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// A bidirectional byte carrier to one remote endpoint.
///
/// All methods take `&self` so one instance can be shared (behind an `Arc`)
/// by a receive task and a send task at the same time. Implementations keep
/// the read and write directions independently locked so the two never
/// contend.
pub trait Transport: Send + Sync + 'static {
    /// Establishes the connection. Stream carriers disable Nagle's
    /// algorithm so small protocol messages go out immediately.
    fn connect(
        &self,
        addr: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends as much of `data` as the carrier accepts in one call.
    ///
    /// Message-framed carriers send all of `data` as one frame.
    fn send(
        &self,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Fills as much of `buf` as is available.
    ///
    /// Returns `Ok(0)` when the remote closed the connection in an orderly
    /// way. `buf` must not be empty.
    fn receive(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Best-effort graceful shutdown. Calling it twice is harmless.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn state(&self) -> TransportState;

    /// Local endpoint of the underlying socket, when connected.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Whether `addr` names a WebSocket endpoint (`ws://` or `wss://`).
pub fn is_websocket_url(addr: &str) -> bool {
    let lower = addr.trim_start().to_ascii_lowercase();
    lower.starts_with("ws://") || lower.starts_with("wss://")
}

// ---------------------------------------------------------------------------
// Carrier
// ---------------------------------------------------------------------------

/// The two supported carriers behind one [`Transport`] impl.
#[derive(Debug)]
pub enum Carrier {
    Stream(TcpTransport),
    #[cfg(feature = "websocket")]
    Framed(WebSocketTransport),
}

impl Carrier {
    pub fn stream() -> Self {
        Self::Stream(TcpTransport::new())
    }

    #[cfg(feature = "websocket")]
    pub fn framed(initial_capacity: usize, max_frame_size: usize) -> Self {
        Self::Framed(WebSocketTransport::with_limits(initial_capacity, max_frame_size))
    }

    /// Picks the framed carrier for `ws://`/`wss://` addresses and the
    /// stream carrier otherwise.
    pub fn for_address(addr: &str, initial_capacity: usize, max_frame_size: usize) -> Self {
        #[cfg(feature = "websocket")]
        if is_websocket_url(addr) {
            return Self::framed(initial_capacity, max_frame_size);
        }
        let _ = (addr, initial_capacity, max_frame_size);
        Self::stream()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            #[cfg(feature = "websocket")]
            Self::Framed(_) => "framed",
        }
    }
}

impl Transport for Carrier {
    async fn connect(&self, addr: &str, cancel: &CancellationToken) -> Result<(), TransportError> {
        match self {
            Self::Stream(t) => t.connect(addr, cancel).await,
            #[cfg(feature = "websocket")]
            Self::Framed(t) => t.connect(addr, cancel).await,
        }
    }

    async fn send(&self, data: &[u8], cancel: &CancellationToken) -> Result<usize, TransportError> {
        match self {
            Self::Stream(t) => t.send(data, cancel).await,
            #[cfg(feature = "websocket")]
            Self::Framed(t) => t.send(data, cancel).await,
        }
    }

    async fn receive(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        match self {
            Self::Stream(t) => t.receive(buf, cancel).await,
            #[cfg(feature = "websocket")]
            Self::Framed(t) => t.receive(buf, cancel).await,
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match self {
            Self::Stream(t) => t.disconnect().await,
            #[cfg(feature = "websocket")]
            Self::Framed(t) => t.disconnect().await,
        }
    }

    fn state(&self) -> TransportState {
        match self {
            Self::Stream(t) => t.state(),
            #[cfg(feature = "websocket")]
            Self::Framed(t) => t.state(),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Stream(t) => t.local_addr(),
            #[cfg(feature = "websocket")]
            Self::Framed(t) => t.local_addr(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers for the implementations
// ---------------------------------------------------------------------------

/// Atomic holder for a [`TransportState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(TransportState::Disconnected as u8))
    }

    pub(crate) fn get(&self) -> TransportState {
        match self.0.load(Ordering::Acquire) {
            1 => TransportState::Connecting,
            2 => TransportState::Connected,
            _ => TransportState::Disconnected,
        }
    }

    pub(crate) fn set(&self, state: TransportState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = fut => result,
    }
}

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
