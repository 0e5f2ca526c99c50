//! Packet framing and dispatch over a receive buffer.
//!
//! The dispatcher keeps no framing state of its own. Every call to
//! [`Dispatcher::dispatch`] looks at the head of the buffer again:
//!
//! ```text
//! head byte ──► length table ──► enough bytes? ──► handler ──► commit_read(L)
//!                    │                 │
//!                    ▼                 ▼
//!             unknown: fatal     no: stop, retry next tick
//! ```
//!
//! The read cursor only moves once a whole packet has been handed to its
//! handler, so a packet split across several network reads is seen exactly
//! once, after its last byte arrives.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use shardnet_buffer::ByteSource;

use crate::{
    ByteCursor, FramingError, HandlerTable, PacketLength, PacketLengths, ProtocolError,
    VARIABLE_HEADER_LEN,
};

/// Observer called with every complete packet before its handler runs,
/// whether or not a handler is registered.
pub type Inspector = Box<dyn FnMut(&[u8]) + Send>;

/// Outcome of one [`Dispatcher::dispatch`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Packets handed to a handler that returned `Ok`.
    pub dispatched: usize,
    /// Packets with a known length but no registered handler.
    pub skipped: usize,
    /// Packets whose handler returned an error or panicked.
    pub failed: usize,
    /// Bytes consumed from the source.
    pub consumed: usize,
}

impl DispatchReport {
    /// Total packets framed during the pass.
    pub fn packets(&self) -> usize {
        self.dispatched + self.skipped + self.failed
    }

    /// Adds the counts of another pass to this one.
    pub fn merge(&mut self, other: DispatchReport) {
        self.dispatched += other.dispatched;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.consumed += other.consumed;
    }
}

enum Delivery {
    Handled,
    Skipped,
    Failed,
}

/// Frames packets out of a [`ByteSource`] and routes them to handlers.
pub struct Dispatcher {
    lengths: PacketLengths,
    handlers: HandlerTable,
    inspector: Option<Inspector>,
    // Holds packets that straddle the buffer's wrap point.
    scratch: Vec<u8>,
}

impl Dispatcher {
    pub fn new(lengths: PacketLengths, handlers: HandlerTable) -> Self {
        Self {
            lengths,
            handlers,
            inspector: None,
            scratch: Vec::new(),
        }
    }

    /// Registers a handler, replacing any previous one for `opcode`.
    pub fn register_handler<F>(&mut self, opcode: u8, handler: F)
    where
        F: FnMut(&mut ByteCursor<'_>) -> Result<(), ProtocolError> + Send + 'static,
    {
        if self.lengths.get(opcode).is_none() {
            tracing::warn!(
                opcode = format_args!("{opcode:#04x}"),
                "handler registered for opcode without a known length"
            );
        }
        self.handlers.register(opcode, handler);
    }

    pub fn set_inspector(&mut self, inspector: Inspector) {
        self.inspector = Some(inspector);
    }

    pub fn lengths(&self) -> &PacketLengths {
        &self.lengths
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    /// Dispatches every complete packet at the head of `source`.
    ///
    /// Stops at the first incomplete packet, leaving its bytes in place.
    /// Handler failures are counted in the report and do not stop the
    /// pass. A [`FramingError`] means the stream is desynchronized; the
    /// caller must drop the connection.
    pub fn dispatch<S>(&mut self, source: &mut S) -> Result<DispatchReport, FramingError>
    where
        S: ByteSource + ?Sized,
    {
        let mut report = DispatchReport::default();

        while let Some(opcode) = source.peek(0) {
            let Some((length, header)) = self.frame(source, opcode)? else {
                break;
            };

            let region = source.readable_region();
            let delivery = if region.len() >= length {
                deliver(
                    &mut self.handlers,
                    &mut self.inspector,
                    opcode,
                    &region[..length],
                    header,
                )
            } else {
                self.scratch.resize(length, 0);
                let copied = source.copy_to(&mut self.scratch[..length]);
                debug_assert_eq!(copied, length);
                deliver(
                    &mut self.handlers,
                    &mut self.inspector,
                    opcode,
                    &self.scratch[..length],
                    header,
                )
            };

            source.commit_read(length)?;
            report.consumed += length;
            match delivery {
                Delivery::Handled => report.dispatched += 1,
                Delivery::Skipped => report.skipped += 1,
                Delivery::Failed => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Length and header size of the packet at the head, or `None` when it
    /// has not fully arrived yet.
    fn frame<S>(&self, source: &S, opcode: u8) -> Result<Option<(usize, usize)>, FramingError>
    where
        S: ByteSource + ?Sized,
    {
        let kind = self
            .lengths
            .get(opcode)
            .ok_or(FramingError::UnknownOpcode(opcode))?;

        let length = match kind {
            PacketLength::Fixed(0) => {
                return Err(FramingError::InvalidLength { opcode, length: 0 });
            }
            PacketLength::Fixed(n) => n as usize,
            PacketLength::Variable => {
                let (Some(hi), Some(lo)) = (source.peek(1), source.peek(2)) else {
                    return Ok(None);
                };
                let length = u16::from_be_bytes([hi, lo]) as usize;
                if length < VARIABLE_HEADER_LEN {
                    return Err(FramingError::InvalidLength { opcode, length });
                }
                length
            }
        };

        if length > source.capacity() {
            return Err(FramingError::Oversized {
                opcode,
                length,
                capacity: source.capacity(),
            });
        }
        if source.buffered() < length {
            return Ok(None);
        }
        Ok(Some((length, kind.header_len())))
    }
}

fn deliver(
    handlers: &mut HandlerTable,
    inspector: &mut Option<Inspector>,
    opcode: u8,
    packet: &[u8],
    header: usize,
) -> Delivery {
    if let Some(inspect) = inspector {
        inspect(packet);
    }

    let Some(handler) = handlers.get_mut(opcode) else {
        tracing::trace!(
            opcode = format_args!("{opcode:#04x}"),
            len = packet.len(),
            "no handler, packet skipped"
        );
        return Delivery::Skipped;
    };

    let mut cursor = ByteCursor::framed(packet, header);
    match panic::catch_unwind(AssertUnwindSafe(|| handler(&mut cursor))) {
        Ok(Ok(())) => Delivery::Handled,
        Ok(Err(e)) => {
            tracing::warn!(
                opcode = format_args!("{opcode:#04x}"),
                error = %e,
                "packet handler failed"
            );
            Delivery::Failed
        }
        Err(_) => {
            tracing::warn!(
                opcode = format_args!("{opcode:#04x}"),
                "packet handler panicked"
            );
            Delivery::Failed
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("known_lengths", &self.lengths.known())
            .field("handlers", &self.handlers.len())
            .field("inspector", &self.inspector.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardnet_buffer::RingBuffer;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            PacketLengths::new().with_fixed(0x01, 3).with_variable(0xB0),
            HandlerTable::new(),
        )
    }

    #[test]
    fn test_empty_source_is_a_no_op() {
        let mut d = dispatcher();
        let mut ring = RingBuffer::new(16);
        assert_eq!(d.dispatch(&mut ring).unwrap(), DispatchReport::default());
    }

    #[test]
    fn test_partial_variable_header_waits() {
        let mut d = dispatcher();
        let mut ring = RingBuffer::new(16);
        ring.write_all(&[0xB0, 0x00]).unwrap();
        assert_eq!(d.dispatch(&mut ring).unwrap().packets(), 0);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_fixed_zero_length_is_invalid() {
        let mut d = Dispatcher::new(PacketLengths::new().with_fixed(0x05, 0), HandlerTable::new());
        let mut ring = RingBuffer::new(16);
        ring.write_all(&[0x05]).unwrap();
        assert_eq!(
            d.dispatch(&mut ring),
            Err(FramingError::InvalidLength { opcode: 0x05, length: 0 })
        );
    }

    #[test]
    fn test_inspector_sees_skipped_packets() {
        use std::sync::{Arc, Mutex};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut d = dispatcher();
        let sink = Arc::clone(&seen);
        d.set_inspector(Box::new(move |p: &[u8]| sink.lock().unwrap().push(p.to_vec())));

        let mut ring = RingBuffer::new(16);
        ring.write_all(&[0x01, 0x02, 0x03]).unwrap();
        let report = d.dispatch(&mut ring).unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(*seen.lock().unwrap(), vec![vec![0x01, 0x02, 0x03]]);
    }
}
