//! Connection lifecycle and the per-tick processing step.
//!
//! A connected [`Connection`] runs two background tasks and leaves the
//! packet work to the caller's game loop:
//!
//! ```text
//!              receive task                          tick context
//! transport ──► receive() ──► recv ring ──► process() ──► Dispatcher ──► handlers
//!
//!              flush task                            tick context
//! transport ◄── send() ◄──── send ring ◄──── send(bytes) + trigger
//! ```
//!
//! Each ring buffer has exactly one writer and one reader, so the tick
//! context never takes a lock and never waits on I/O. The only
//! synchronization is a [`ReadinessSignal`] per direction:
//!
//! - the flush task sleeps on `outbound` until `send` queues bytes;
//! - the receive task sleeps on `space` when the receive ring is full,
//!   until `process` has consumed packets;
//! - [`Connection::readable`] sleeps on `inbound` until the receive task
//!   appends bytes.
//!
//! Every failure ends the session the same way: one [`DisconnectEvent`]
//! on the broadcast channel, the cancellation token fired, and every signal
//! released. Reconnecting is left to the caller.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shardnet_buffer::{ByteSource, Consumer, Producer, ReadinessSignal, RingBuffer};
use shardnet_protocol::{ByteCursor, DispatchReport, Dispatcher, PacketWriter, ProtocolError};
use shardnet_transport::{CancellationToken, Carrier, Transport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::packet_log::{Direction, PacketLogger};
use crate::{NetConfig, NetError, NetStatistics, StatsSnapshot};

/// `127.0.0.1` packed the way [`Connection::local_ip`] packs addresses.
pub const LOOPBACK_IP: u32 = 0x0100_007F;

const EVENT_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Disconnect events
// ---------------------------------------------------------------------------

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The remote closed the connection in an orderly way.
    RemoteClosed,
    /// Connect failure, I/O error, or oversized frame.
    TransportError,
    /// [`Connection::disconnect`] was called or the connection dropped.
    Cancelled,
    /// The inbound stream could not be split into packets.
    Framing,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RemoteClosed => "remote closed",
            Self::TransportError => "transport error",
            Self::Cancelled => "cancelled",
            Self::Framing => "framing error",
        })
    }
}

/// Published exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub reason: DisconnectReason,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Session state shared with the I/O tasks
// ---------------------------------------------------------------------------

struct Session {
    cancel: CancellationToken,
    outbound: ReadinessSignal,
    space: ReadinessSignal,
    inbound: ReadinessSignal,
    reported: AtomicBool,
    events: broadcast::Sender<DisconnectEvent>,
    stats: Arc<NetStatistics>,
}

impl Session {
    fn new(events: broadcast::Sender<DisconnectEvent>, stats: Arc<NetStatistics>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            outbound: ReadinessSignal::new(),
            space: ReadinessSignal::new(),
            inbound: ReadinessSignal::new(),
            reported: AtomicBool::new(false),
            events,
            stats,
        }
    }

    fn is_over(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }

    /// Ends the session. Only the first call has any effect.
    fn report(&self, reason: DisconnectReason, message: impl Into<String>) {
        if self.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        let message = message.into();
        match reason {
            DisconnectReason::Cancelled => {
                tracing::info!(%reason, %message, "connection closed");
            }
            _ => tracing::warn!(%reason, %message, "connection lost"),
        }

        self.cancel.cancel();
        self.outbound.cancel();
        self.space.cancel();
        self.inbound.cancel();

        // Having no subscribers is not an error.
        let _ = self.events.send(DisconnectEvent { reason, message });
    }
}

/// Everything that exists only while connected.
struct Link<T> {
    transport: Arc<T>,
    session: Arc<Session>,
    recv: Consumer,
    send: Producer,
    receiver: JoinHandle<Producer>,
    flusher: JoinHandle<Consumer>,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A client connection to one game or login server.
///
/// Drive it from the game loop: call [`process`](Self::process) once per
/// tick to run handlers for every complete packet, and
/// [`send`](Self::send) to queue outbound messages. Neither call blocks.
///
/// ```rust,no_run
/// use shardnet::{Connection, Dispatcher, HandlerTable, NetConfig, PacketLengths};
///
/// # async fn run() -> Result<(), shardnet::NetError> {
/// let lengths = PacketLengths::new().with_fixed(0x73, 2);
/// let mut conn = Connection::new(
///     NetConfig::default(),
///     Dispatcher::new(lengths, HandlerTable::new()),
/// );
/// conn.register_handler(0x73, |c| {
///     let seq = c.read_u8()?;
///     tracing::debug!(seq, "ping");
///     Ok(())
/// });
///
/// conn.connect("127.0.0.1:2593").await?;
/// loop {
///     conn.process()?;
///     tokio::time::sleep(std::time::Duration::from_millis(16)).await;
/// }
/// # }
/// ```
pub struct Connection<T: Transport = Carrier> {
    config: NetConfig,
    dispatcher: Dispatcher,
    link: Option<Link<T>>,
    // Receive and send rings kept between sessions.
    spare: Option<(RingBuffer, RingBuffer)>,
    inject: RingBuffer,
    events: broadcast::Sender<DisconnectEvent>,
    stats: Arc<NetStatistics>,
    logger: Option<Arc<PacketLogger>>,
}

impl Connection {
    /// A connection whose carrier is picked from the address and
    /// [`NetConfig::carrier`].
    pub fn new(config: NetConfig, dispatcher: Dispatcher) -> Self {
        Self::with_config(config, dispatcher)
    }

    /// Connects to `addr`. `ws://` addresses use the framed carrier unless
    /// the config forces one.
    pub async fn connect(&mut self, addr: &str) -> Result<(), NetError> {
        let carrier = self.config.carrier_for(addr);
        tracing::debug!(addr, carrier = carrier.name(), "carrier selected");
        self.connect_with(carrier, addr).await
    }
}

impl<T: Transport> Connection<T> {
    /// A connection driven by transports of type `T`.
    pub fn with_config(config: NetConfig, mut dispatcher: Dispatcher) -> Self {
        let config = config.validated();

        let logger = config
            .packet_log
            .then(|| Arc::new(PacketLogger::new(&config.redacted_opcodes)));
        if let Some(logger) = &logger {
            let logger = Arc::clone(logger);
            dispatcher.set_inspector(Box::new(move |packet: &[u8]| {
                logger.log(Direction::Inbound, packet)
            }));
        }

        let spare = (
            RingBuffer::new(config.recv_capacity),
            RingBuffer::new(config.send_capacity),
        );
        let inject = RingBuffer::new(config.inject_capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            dispatcher,
            link: None,
            spare: Some(spare),
            inject,
            events,
            stats: Arc::new(NetStatistics::new()),
            logger,
        }
    }

    /// Connects `transport` to `addr` and starts the I/O tasks.
    ///
    /// A session that already ended (remote close, error) is torn down
    /// first; a live one makes this fail with
    /// [`NetError::AlreadyConnected`].
    pub async fn connect_with(&mut self, transport: T, addr: &str) -> Result<(), NetError> {
        if let Some(link) = &self.link {
            if !link.session.is_over() {
                return Err(NetError::AlreadyConnected);
            }
            self.disconnect().await?;
        }

        let session = Arc::new(Session::new(self.events.clone(), Arc::clone(&self.stats)));
        let transport = Arc::new(transport);
        if let Err(e) = transport.connect(addr, &session.cancel).await {
            session.report(DisconnectReason::TransportError, e.to_string());
            return Err(e.into());
        }

        let config = &self.config;
        let (mut recv, mut send) = self.spare.take().unwrap_or_else(|| {
            (
                RingBuffer::new(config.recv_capacity),
                RingBuffer::new(config.send_capacity),
            )
        });
        recv.clear();
        send.clear();
        let (recv_writer, recv_reader) = recv.split();
        let (send_writer, send_reader) = send.split();

        self.stats.reset();
        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&transport),
            recv_writer,
            Arc::clone(&session),
        ));
        let flusher = tokio::spawn(flush_loop(
            Arc::clone(&transport),
            send_reader,
            Arc::clone(&session),
        ));

        tracing::info!(addr, local = ?transport.local_addr(), "connected");
        self.link = Some(Link {
            transport,
            session,
            recv: recv_reader,
            send: send_writer,
            receiver,
            flusher,
        });
        Ok(())
    }

    /// Stops the I/O tasks and closes the transport.
    ///
    /// Publishes [`DisconnectReason::Cancelled`] unless the session already
    /// ended for another reason. Bytes still queued for sending are
    /// dropped. Calling this while disconnected does nothing.
    pub async fn disconnect(&mut self) -> Result<(), NetError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        link.session
            .report(DisconnectReason::Cancelled, "disconnect requested");

        let recv = match link.receiver.await {
            Ok(writer) => RingBuffer::reunite(writer, link.recv).ok(),
            Err(e) => {
                tracing::warn!(error = %e, "receive task failed");
                None
            }
        };
        let send = match link.flusher.await {
            Ok(reader) => RingBuffer::reunite(link.send, reader).ok(),
            Err(e) => {
                tracing::warn!(error = %e, "flush task failed");
                None
            }
        };
        let closed = link.transport.disconnect().await;

        let mut recv = recv.unwrap_or_else(|| RingBuffer::new(self.config.recv_capacity));
        let mut send = send.unwrap_or_else(|| RingBuffer::new(self.config.send_capacity));
        recv.clear();
        send.clear();
        self.spare = Some((recv, send));
        self.inject.clear();
        self.stats.stop_clock();

        tracing::debug!("connection torn down");
        closed.map_err(NetError::from)
    }

    /// Dispatches every complete packet received so far, then every
    /// injected packet. Call once per game tick.
    ///
    /// Returns an empty report when not connected. A framing error on the
    /// network stream ends the session with [`DisconnectReason::Framing`]
    /// and is also returned; after that nothing is dispatched.
    pub fn process(&mut self) -> Result<DispatchReport, NetError> {
        let Some(link) = self.link.as_mut() else {
            return Ok(DispatchReport::default());
        };
        if link.session.is_over() {
            return Ok(DispatchReport::default());
        }

        let mut report = match self.dispatcher.dispatch(&mut link.recv) {
            Ok(report) => report,
            Err(e) => {
                link.session.report(DisconnectReason::Framing, e.to_string());
                return Err(e.into());
            }
        };
        if report.consumed > 0 {
            let free = link.recv.capacity() - link.recv.len();
            link.session.space.trigger(free);
        }

        if !self.inject.is_empty() {
            match self.dispatcher.dispatch(&mut self.inject) {
                Ok(injected) => report.merge(injected),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        dropped = self.inject.len(),
                        "injected bytes discarded"
                    );
                    self.inject.clear();
                }
            }
        }

        self.stats.record_packets_received(report.packets());
        Ok(report)
    }

    /// Queues `bytes` for sending, all or nothing.
    ///
    /// Fails with [`NetError::SendBufferFull`] when the send ring cannot
    /// take the whole message. In that case nothing is queued.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        let link = live(&mut self.link)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let free = link.send.free();
        if bytes.len() > free {
            return Err(NetError::SendBufferFull {
                needed: bytes.len(),
                free,
            });
        }
        link.send.write_all(bytes)?;

        if let Some(logger) = &self.logger {
            logger.log(Direction::Outbound, bytes);
        }
        self.stats.record_packet_sent();
        link.session.outbound.trigger(bytes.len());
        Ok(())
    }

    /// Finishes `packet` and queues it.
    pub fn send_packet(&mut self, packet: PacketWriter) -> Result<(), NetError> {
        let bytes = packet.finish()?;
        self.send(&bytes)
    }

    /// Queues already-framed packets for local dispatch, as if they had
    /// arrived from the network. They run on the next
    /// [`process`](Self::process) after the network packets.
    pub fn inject(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        let free = self.inject.free();
        if bytes.len() > free {
            return Err(NetError::InjectBufferFull {
                needed: bytes.len(),
                free,
            });
        }
        self.inject.write_all(bytes)?;
        Ok(())
    }

    /// Waits until the receive ring holds unread bytes.
    ///
    /// Resolves at once when bytes are already buffered. Fails with
    /// [`NetError::Cancelled`] when the session ends while waiting.
    pub async fn readable(&mut self) -> Result<usize, NetError> {
        let link = self.link.as_ref().ok_or(NetError::NotConnected)?;
        let ready = link.session.inbound.wait(&link.recv).await?;
        Ok(ready)
    }

    /// Registers a packet handler on this connection's dispatcher.
    pub fn register_handler<F>(&mut self, opcode: u8, handler: F)
    where
        F: FnMut(&mut ByteCursor<'_>) -> Result<(), ProtocolError> + Send + 'static,
    {
        self.dispatcher.register_handler(opcode, handler);
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// A receiver for disconnect events. Subscribe before connecting to
    /// see connect failures too.
    pub fn subscribe(&self) -> broadcast::Receiver<DisconnectEvent> {
        self.events.subscribe()
    }

    /// Whether a session is live: connected and not yet ended.
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.session.is_over())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().and_then(|l| l.transport.local_addr())
    }

    /// Local IPv4 address packed little-endian (first octet in the low
    /// byte), or [`LOOPBACK_IP`] when unknown.
    pub fn local_ip(&self) -> u32 {
        match self.local_addr().map(|a| a.ip()) {
            Some(IpAddr::V4(ip)) => u32::from_le_bytes(ip.octets()),
            _ => LOOPBACK_IP,
        }
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }
}

fn live<T>(link: &mut Option<Link<T>>) -> Result<&mut Link<T>, NetError> {
    match link {
        Some(link) if !link.session.is_over() => Ok(link),
        _ => Err(NetError::NotConnected),
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.session
                .report(DisconnectReason::Cancelled, "connection dropped");
        }
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("local_addr", &self.local_addr())
            .field("dispatcher", &self.dispatcher)
            .field("inject", &self.inject)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// I/O tasks
// ---------------------------------------------------------------------------

/// Reads from the transport into the receive ring until the session ends.
/// Returns the writer half so the ring can be reused.
async fn receive_loop<T: Transport>(
    transport: Arc<T>,
    mut ring: Producer,
    session: Arc<Session>,
) -> Producer {
    loop {
        if ring.free() == 0 {
            tracing::debug!(capacity = ring.capacity(), "receive buffer full, deferring reads");
            if session.space.wait_until(|| ring.free()).await.is_err() {
                break;
            }
            continue;
        }

        let received = transport
            .receive(ring.writable_region(), &session.cancel)
            .await;
        match received {
            Ok(0) => {
                session.report(DisconnectReason::RemoteClosed, "remote closed the connection");
                break;
            }
            Ok(n) => {
                session.stats.record_received(n);
                if let Err(e) = ring.commit_write(n) {
                    session.report(DisconnectReason::TransportError, e.to_string());
                    break;
                }
                tracing::trace!(bytes = n, "received");
                session.inbound.trigger(n);
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                session.report(DisconnectReason::TransportError, e.to_string());
                break;
            }
        }
    }
    ring
}

/// Drains the send ring into the transport whenever bytes are queued.
/// Returns the reader half so the ring can be reused.
async fn flush_loop<T: Transport>(
    transport: Arc<T>,
    mut ring: Consumer,
    session: Arc<Session>,
) -> Consumer {
    while session.outbound.wait(&ring).await.is_ok() {
        while !ring.is_empty() {
            let sent = transport
                .send(ring.readable_region(), &session.cancel)
                .await;
            match sent {
                Ok(0) => {
                    session.report(DisconnectReason::TransportError, "transport accepted no bytes");
                    return ring;
                }
                Ok(n) => {
                    if let Err(e) = ring.commit_read(n) {
                        session.report(DisconnectReason::TransportError, e.to_string());
                        return ring;
                    }
                    tracing::trace!(bytes = n, "flushed");
                    session.stats.record_sent(n);
                }
                Err(e) if e.is_cancelled() => return ring,
                Err(e) => {
                    session.report(DisconnectReason::TransportError, e.to_string());
                    return ring;
                }
            }
        }
    }
    ring
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_packing() {
        let ip: std::net::Ipv4Addr = "127.0.0.1".parse().unwrap();
        assert_eq!(u32::from_le_bytes(ip.octets()), LOOPBACK_IP);
    }

    #[test]
    fn test_report_fires_once() {
        let (events, mut rx) = broadcast::channel(4);
        let session = Session::new(events, Arc::new(NetStatistics::new()));

        session.report(DisconnectReason::RemoteClosed, "first");
        session.report(DisconnectReason::Cancelled, "second");

        assert!(session.is_over());
        assert!(session.cancel.is_cancelled());
        assert!(session.outbound.is_cancelled());
        let event = rx.try_recv().unwrap();
        assert_eq!(event.reason, DisconnectReason::RemoteClosed);
        assert_eq!(event.message, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::Framing.to_string(), "framing error");
        assert_eq!(DisconnectReason::RemoteClosed.to_string(), "remote closed");
    }
}
