//! Raw stream-socket transport.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{StateCell, Transport, TransportError, TransportState, cancellable, lock};

/// A [`Transport`] over a plain TCP connection.
///
/// The socket is split after connecting so that a receive in flight never
/// blocks a send.
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    state: StateCell,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            state: StateCell::new(),
            local_addr: std::sync::Mutex::new(None),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    async fn connect(&self, addr: &str, cancel: &CancellationToken) -> Result<(), TransportError> {
        let target = addr.strip_prefix("tcp://").unwrap_or(addr);
        if target.is_empty() {
            return Err(TransportError::InvalidAddress(addr.to_string()));
        }

        self.state.set(TransportState::Connecting);
        let connected = cancellable(cancel, async {
            TcpStream::connect(target)
                .await
                .map_err(|source| TransportError::ConnectFailed {
                    addr: target.to_string(),
                    source,
                })
        })
        .await;

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                self.state.set(TransportState::Disconnected);
                return Err(e);
            }
        };

        if let Err(source) = stream.set_nodelay(true) {
            self.state.set(TransportState::Disconnected);
            return Err(TransportError::ConnectFailed {
                addr: target.to_string(),
                source,
            });
        }

        let local = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        *lock(&self.local_addr) = local;
        self.state.set(TransportState::Connected);

        tracing::debug!(addr = target, local = ?local, "stream transport connected");
        Ok(())
    }

    async fn send(&self, data: &[u8], cancel: &CancellationToken) -> Result<usize, TransportError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        cancellable(cancel, async {
            writer.write(data).await.map_err(TransportError::SendFailed)
        })
        .await
    }

    async fn receive(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;
        cancellable(cancel, async {
            reader.read(buf).await.map_err(TransportError::ReceiveFailed)
        })
        .await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Halves still held by an in-flight call are dropped with `self`.
        if let Ok(mut guard) = self.writer.try_lock() {
            if let Some(mut writer) = guard.take() {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!(error = %e, "stream shutdown failed");
                }
            }
        }
        if let Ok(mut guard) = self.reader.try_lock() {
            guard.take();
        }
        *lock(&self.local_addr) = None;
        if self.state.get() != TransportState::Disconnected {
            tracing::debug!("stream transport disconnected");
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
