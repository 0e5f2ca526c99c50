//! Integration tests for packet framing and dispatch.
//!
//! The dispatcher is driven the way a connection drives it: bytes are
//! pushed into a ring buffer in arbitrary pieces, and `dispatch` is called
//! after every push as if once per game tick.

use std::sync::{Arc, Mutex};

use shardnet_buffer::RingBuffer;
use shardnet_protocol::{
    ByteCursor, Dispatcher, FramingError, HandlerTable, PacketLengths, PacketWriter,
    ProtocolError,
};

// ===========================================================================
// Helpers
// ===========================================================================

/// Payloads (bytes after the header) seen by a recording handler.
type Seen = Arc<Mutex<Vec<Vec<u8>>>>;

fn recorder(dispatcher: &mut Dispatcher, opcode: u8) -> Seen {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    dispatcher.register_handler(opcode, move |c: &mut ByteCursor<'_>| {
        sink.lock().unwrap().push(c.payload().to_vec());
        Ok(())
    });
    seen
}

fn dispatcher(lengths: PacketLengths) -> Dispatcher {
    Dispatcher::new(lengths, HandlerTable::new())
}

// ===========================================================================
// Framing
// ===========================================================================

#[test]
fn test_fixed_packet_fed_byte_by_byte_dispatches_once() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x2E, 5));
    let packets: Arc<Mutex<Vec<usize>>> = Arc::default();
    let sink = Arc::clone(&packets);
    d.register_handler(0x2E, move |c| {
        sink.lock().unwrap().push(c.packet().len());
        Ok(())
    });

    let mut ring = RingBuffer::new(16);
    for (i, byte) in [0x2E, 1, 2, 3, 4].into_iter().enumerate() {
        ring.write_all(&[byte]).unwrap();
        let report = d.dispatch(&mut ring).unwrap();
        if i < 4 {
            assert_eq!(report.packets(), 0, "dispatched early at byte {i}");
            assert_eq!(ring.len(), i + 1);
        } else {
            assert_eq!(report.dispatched, 1);
            assert_eq!(report.consumed, 5);
        }
    }

    assert_eq!(*packets.lock().unwrap(), vec![5]);
    assert!(ring.is_empty());
}

#[test]
fn test_unknown_opcode_is_fatal_and_calls_nothing() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x01, 3));
    let seen = recorder(&mut d, 0x01);

    let mut ring = RingBuffer::new(16);
    ring.write_all(&[0x7F, 0x01, 0x02]).unwrap();

    assert_eq!(d.dispatch(&mut ring), Err(FramingError::UnknownOpcode(0x7F)));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(ring.len(), 3, "nothing is consumed on a framing error");
}

#[test]
fn test_two_pushes_yield_two_packets_in_order() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x01, 3));
    let seen = recorder(&mut d, 0x01);
    let mut ring = RingBuffer::new(16);

    ring.write_all(&[0x01, 0xAA]).unwrap();
    assert_eq!(d.dispatch(&mut ring).unwrap().dispatched, 0);

    ring.write_all(&[0xBB, 0x01, 0xCC, 0xDD]).unwrap();
    assert_eq!(d.dispatch(&mut ring).unwrap().dispatched, 2);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec![0xAA, 0xBB], vec![0xCC, 0xDD]]
    );
}

#[test]
fn test_variable_length_packet() {
    let mut d = dispatcher(PacketLengths::new().with_variable(0xB0));
    let seen = recorder(&mut d, 0xB0);
    let mut ring = RingBuffer::new(32);

    ring.write_all(&[0xB0, 0x00, 0x06, 0x01]).unwrap();
    assert_eq!(d.dispatch(&mut ring).unwrap().packets(), 0);

    ring.write_all(&[0x02, 0x03]).unwrap();
    assert_eq!(d.dispatch(&mut ring).unwrap().dispatched, 1);
    assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3]]);
}

#[test]
fn test_variable_length_shorter_than_header_is_fatal() {
    let mut d = dispatcher(PacketLengths::new().with_variable(0xB0));
    let mut ring = RingBuffer::new(16);
    ring.write_all(&[0xB0, 0x00, 0x02]).unwrap();

    assert_eq!(
        d.dispatch(&mut ring),
        Err(FramingError::InvalidLength { opcode: 0xB0, length: 2 })
    );
}

#[test]
fn test_length_beyond_capacity_is_fatal() {
    let mut d = dispatcher(PacketLengths::new().with_variable(0xB0));
    let mut ring = RingBuffer::new(16);
    ring.write_all(&[0xB0, 0x01, 0x00]).unwrap();

    assert_eq!(
        d.dispatch(&mut ring),
        Err(FramingError::Oversized { opcode: 0xB0, length: 256, capacity: 16 })
    );
}

// ===========================================================================
// Delivery
// ===========================================================================

#[test]
fn test_packet_straddling_the_wrap_point() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x01, 3).with_fixed(0x02, 6));
    let seen = recorder(&mut d, 0x02);
    let mut ring = RingBuffer::new(8);

    // Move both cursors to index 6 so the next packet wraps.
    ring.write_all(&[0x01, 0, 0, 0x01, 0, 0]).unwrap();
    assert_eq!(d.dispatch(&mut ring).unwrap().skipped, 2);

    ring.write_all(&[0x02, 10, 20, 30, 40, 50]).unwrap();
    assert!(ring.readable_region().len() < 6);
    assert_eq!(d.dispatch(&mut ring).unwrap().dispatched, 1);
    assert_eq!(*seen.lock().unwrap(), vec![vec![10, 20, 30, 40, 50]]);
}

#[test]
fn test_handler_error_does_not_stop_dispatch() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x01, 2).with_fixed(0x02, 2));
    d.register_handler(0x01, |c| {
        c.read_u32_be()?;
        Ok(())
    });
    let seen = recorder(&mut d, 0x02);

    let mut ring = RingBuffer::new(16);
    ring.write_all(&[0x01, 0xFF, 0x02, 0x07]).unwrap();
    let report = d.dispatch(&mut ring).unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.consumed, 4);
    assert_eq!(*seen.lock().unwrap(), vec![vec![0x07]]);
}

#[test]
fn test_handler_panic_is_isolated() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x01, 1).with_fixed(0x02, 1));
    d.register_handler(0x01, |_| panic!("handler bug"));
    let seen = recorder(&mut d, 0x02);

    let mut ring = RingBuffer::new(16);
    ring.write_all(&[0x01, 0x02]).unwrap();
    let report = d.dispatch(&mut ring).unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(ring.is_empty());
}

#[test]
fn test_known_length_without_handler_is_skipped() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x01, 3).with_fixed(0x02, 2));
    let seen = recorder(&mut d, 0x02);

    let mut ring = RingBuffer::new(16);
    ring.write_all(&[0x01, 0xAA, 0xBB, 0x02, 0xCC]).unwrap();
    let report = d.dispatch(&mut ring).unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(*seen.lock().unwrap(), vec![vec![0xCC]]);
}

#[test]
fn test_invalid_payload_reported_through_handler() {
    let mut d = dispatcher(PacketLengths::new().with_fixed(0x10, 2));
    d.register_handler(0x10, |c| match c.read_u8()? {
        0 | 1 => Ok(()),
        other => Err(ProtocolError::InvalidData(format!("flag {other}"))),
    });

    let mut ring = RingBuffer::new(16);
    ring.write_all(&[0x10, 0x01, 0x10, 0x09]).unwrap();
    let report = d.dispatch(&mut ring).unwrap();
    assert_eq!((report.dispatched, report.failed), (1, 1));
}

#[test]
fn test_writer_output_dispatches() {
    let mut d = dispatcher(PacketLengths::new().with_variable(0xAE).with_fixed(0x73, 2));
    let names: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&names);
    d.register_handler(0xAE, move |c| {
        let serial = c.read_u32_be()?;
        assert_eq!(serial, 0x0000_1234);
        sink.lock().unwrap().push(c.read_ascii(30)?);
        Ok(())
    });

    let mut speech = PacketWriter::variable(0xAE);
    speech.write_u32_be(0x1234).write_ascii("Lord British", 30);
    let mut ping = PacketWriter::fixed(0x73, 2);
    ping.write_u8(0x01);

    let mut ring = RingBuffer::new(128);
    ring.write_all(&speech.finish().unwrap()).unwrap();
    ring.write_all(&ping.finish().unwrap()).unwrap();
    let report = d.dispatch(&mut ring).unwrap();

    assert_eq!((report.dispatched, report.skipped), (1, 1));
    assert_eq!(*names.lock().unwrap(), vec!["Lord British".to_string()]);
}
