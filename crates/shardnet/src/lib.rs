//! # shardnet
//!
//! Client-side connection engine for opcode-framed game protocols.
//!
//! The engine moves bytes between a server and the game loop without ever
//! blocking the loop:
//!
//! - **Transport** ([`Carrier`], [`TcpTransport`], [`WebSocketTransport`])
//!   carries bytes over a raw TCP stream or WebSocket binary frames.
//! - **Buffers** ([`RingBuffer`], [`ReadinessSignal`]) hand bytes between
//!   the I/O tasks and the game loop without locks.
//! - **Protocol** ([`Dispatcher`], [`PacketLengths`], [`ByteCursor`],
//!   [`PacketWriter`]) splits the inbound stream into packets and routes
//!   them to handlers.
//! - **Connection** ([`Connection`]) ties the three together and reports
//!   every way a session can end as one [`DisconnectEvent`].
//!
//! ```text
//! Transport (bytes) → RingBuffer → Dispatcher (packets) → handlers
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod config;
mod connection;
mod error;
pub mod packet_log;
mod stats;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::{CarrierKind, DEFAULT_BUFFER_CAPACITY, DEFAULT_REDACTED_OPCODES, NetConfig};
pub use connection::{Connection, DisconnectEvent, DisconnectReason, LOOPBACK_IP};
pub use error::{ConfigError, NetError};
pub use stats::{NetStatistics, StatsSnapshot};

pub use shardnet_buffer::{ByteSource, ReadinessSignal, RingBuffer};
pub use shardnet_protocol::{
    ByteCursor, DispatchReport, Dispatcher, FramingError, HandlerTable, PacketLength,
    PacketLengths, PacketWriter, ProtocolError,
};
pub use shardnet_transport::{
    CancellationToken, Carrier, TcpTransport, Transport, TransportError, TransportState,
    WebSocketTransport,
};
