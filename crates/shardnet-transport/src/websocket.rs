//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The TCP connection is opened by us (so Nagle can be disabled) and then
//! upgraded with a client handshake. Afterwards each `send` is exactly one
//! binary frame.
//!
//! Frames do not line up with the caller's receive buffer, so a frame that
//! is larger than the buffer handed to `receive` is parked in a growable
//! [`RingBuffer`] and drained by the following calls. The parked buffer
//! grows by replacing its backing array, never beyond `max_frame_size`.

use std::fmt;
use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use shardnet_buffer::RingBuffer;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_util::sync::CancellationToken;

use crate::{
    DEFAULT_MAX_FRAME_SIZE, StateCell, Transport, TransportError, TransportState, cancellable,
    lock,
};

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Initial size of the parked-frame buffer.
const DEFAULT_PENDING_CAPACITY: usize = 4096;

struct Inbound {
    frames: SplitStream<WsStream>,
    pending: RingBuffer,
}

/// A message-framed [`Transport`] over a client WebSocket.
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    inbound: Mutex<Option<Inbound>>,
    initial_capacity: usize,
    max_frame_size: usize,
    state: StateCell,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PENDING_CAPACITY, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a transport whose parked-frame buffer starts at
    /// `initial_capacity` and may grow up to `max_frame_size`.
    pub fn with_limits(initial_capacity: usize, max_frame_size: usize) -> Self {
        Self {
            sink: Mutex::new(None),
            inbound: Mutex::new(None),
            initial_capacity,
            max_frame_size,
            state: StateCell::new(),
            local_addr: std::sync::Mutex::new(None),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Copies the head of `frame` into `buf` and parks the rest.
    fn deliver(
        &self,
        pending: &mut RingBuffer,
        frame: &[u8],
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                limit: self.max_frame_size,
            });
        }

        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);

        let rest = &frame[n..];
        if !rest.is_empty() {
            let needed = pending.len() + rest.len();
            if needed > self.max_frame_size {
                return Err(TransportError::FrameTooLarge {
                    size: needed,
                    limit: self.max_frame_size,
                });
            }
            if needed > pending.capacity() {
                pending.grow(needed);
                tracing::debug!(
                    capacity = pending.capacity(),
                    "websocket receive buffer grown"
                );
            }
            pending
                .write_all(rest)
                .map_err(|e| TransportError::ReceiveFailed(std::io::Error::other(e)))?;
        }
        Ok(n)
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("state", &self.state.get())
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

/// Splits a `ws://host[:port]/path` URL into the TCP target.
fn tcp_target(url: &str) -> Result<(String, u16), TransportError> {
    let uri: Uri = url
        .parse()
        .map_err(|_| TransportError::InvalidAddress(url.to_string()))?;
    match uri.scheme_str() {
        Some(s) if s.eq_ignore_ascii_case("ws") => {}
        _ => {
            return Err(TransportError::InvalidAddress(format!(
                "{url}: only ws:// is supported"
            )));
        }
    }
    let host = uri
        .host()
        .ok_or_else(|| TransportError::InvalidAddress(url.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), uri.port_u16().unwrap_or(80)))
}

impl Transport for WebSocketTransport {
    async fn connect(&self, addr: &str, cancel: &CancellationToken) -> Result<(), TransportError> {
        let (host, port) = tcp_target(addr)?;

        self.state.set(TransportState::Connecting);
        let result = cancellable(cancel, async {
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|source| TransportError::ConnectFailed {
                    addr: addr.to_string(),
                    source,
                })?;
            stream
                .set_nodelay(true)
                .map_err(|source| TransportError::ConnectFailed {
                    addr: addr.to_string(),
                    source,
                })?;
            let local = stream.local_addr().ok();
            let (ws, _) = tokio_tungstenite::client_async(addr, stream)
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    addr: addr.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e),
                })?;
            Ok((ws, local))
        })
        .await;

        let (ws, local) = match result {
            Ok(pair) => pair,
            Err(e) => {
                self.state.set(TransportState::Disconnected);
                return Err(e);
            }
        };

        let (sink, frames) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.inbound.lock().await = Some(Inbound {
            frames,
            pending: RingBuffer::new(self.initial_capacity),
        });
        *lock(&self.local_addr) = local;
        self.state.set(TransportState::Connected);

        tracing::debug!(addr, local = ?local, "websocket transport connected");
        Ok(())
    }

    async fn send(&self, data: &[u8], cancel: &CancellationToken) -> Result<usize, TransportError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let msg = Message::Binary(data.to_vec().into());
        cancellable(cancel, async {
            sink.send(msg).await.map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
        })
        .await?;
        Ok(data.len())
    }

    async fn receive(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        let mut guard = self.inbound.lock().await;
        let inbound = guard.as_mut().ok_or(TransportError::NotConnected)?;

        if !inbound.pending.is_empty() {
            return Ok(inbound.pending.read_into(buf));
        }

        loop {
            let next = cancellable(cancel, async { Ok(inbound.frames.next().await) }).await?;
            match next {
                Some(Ok(Message::Binary(data))) => {
                    if data.is_empty() {
                        continue;
                    }
                    return self.deliver(&mut inbound.pending, &data, buf);
                }
                Some(Ok(Message::Text(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    return self.deliver(&mut inbound.pending, text.as_bytes(), buf);
                }
                Some(Ok(Message::Close(_))) | None => return Ok(0),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Ok(mut guard) = self.sink.try_lock() {
            if let Some(mut sink) = guard.take() {
                if let Err(e) = sink.close().await {
                    tracing::debug!(error = %e, "websocket close failed");
                }
            }
        }
        if let Ok(mut guard) = self.inbound.try_lock() {
            guard.take();
        }
        *lock(&self.local_addr) = None;
        if self.state.get() != TransportState::Disconnected {
            tracing::debug!("websocket transport disconnected");
        }
        self.state.set(TransportState::Disconnected);
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }
}
