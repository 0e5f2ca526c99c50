//! Opcode-framed packet protocol for shardnet.
//!
//! Every message on the wire starts with a one-byte opcode:
//!
//! ```text
//! byte    opcode
//! [u16be  length]   only for variable-length opcodes, counts from the opcode
//! byte[]  payload   up to the packet length
//! ```
//!
//! Fixed lengths come from a [`PacketLengths`] table supplied by the
//! caller. The [`Dispatcher`] frames packets out of a receive buffer and
//! hands each one to its handler through a [`ByteCursor`];
//! [`PacketWriter`] builds packets in the same layout.
//!
//! # Architecture
//!
//! ```text
//! RingBuffer (bytes) → Dispatcher (framing) → Handler(&mut ByteCursor)
//! ```
//!
//! The dispatcher never guesses. A head byte with no known length means the
//! stream is desynchronized, which is reported as a [`FramingError`] for
//! the connection to act on.

mod cursor;
mod dispatcher;
mod error;
mod handlers;
mod lengths;
mod writer;

pub use cursor::ByteCursor;
pub use dispatcher::{DispatchReport, Dispatcher, Inspector};
pub use error::{FramingError, ProtocolError};
pub use handlers::{Handler, HandlerTable};
pub use lengths::{PacketLength, PacketLengths, VARIABLE_HEADER_LEN};
pub use writer::PacketWriter;
