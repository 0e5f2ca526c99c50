//! Error types for the protocol layer.
//!
//! Two families, split by consequence:
//!
//! - [`ProtocolError`]: something went wrong *inside* one packet (a
//!   handler read past the end, a writer overflowed its declared length).
//!   It is reported for that packet and dispatch moves on.
//! - [`FramingError`]: the byte stream itself can no longer be split into
//!   packets. Every variant is fatal for the connection.

use shardnet_buffer::BufferError;

/// Errors raised while reading or building a single packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A read asked for more bytes than remain in the packet.
    #[error("read of {needed} bytes with only {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// The bytes were present but their content is not acceptable.
    #[error("invalid packet data: {0}")]
    InvalidData(String),

    /// A writer produced more bytes than its packet length allows.
    #[error("packet body of {written} bytes exceeds declared length {declared}")]
    Overflow { declared: usize, written: usize },
}

/// Unrecoverable loss of packet boundaries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// The head byte names an opcode with no entry in the length table.
    #[error("unknown opcode {0:#04x} with no known length")]
    UnknownOpcode(u8),

    /// A length is smaller than the header it must include.
    #[error("opcode {opcode:#04x} declares impossible length {length}")]
    InvalidLength { opcode: u8, length: usize },

    /// A packet can never fit in the receive buffer, so it can never
    /// complete.
    #[error("opcode {opcode:#04x} length {length} exceeds buffer capacity {capacity}")]
    Oversized {
        opcode: u8,
        length: usize,
        capacity: usize,
    },

    /// The buffer refused a cursor update.
    #[error("buffer cursor error: {0}")]
    Buffer(#[from] BufferError),
}
