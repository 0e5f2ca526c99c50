//! Builder for outbound packets.

use crate::{PacketLength, ProtocolError, VARIABLE_HEADER_LEN};

/// Builds one packet in the wire layout the dispatcher reads.
///
/// ```
/// use shardnet_protocol::PacketWriter;
///
/// let mut w = PacketWriter::variable(0xAD);
/// w.write_u8(0x00).write_u16_be(0x03B2).write_ascii("hi", 4);
/// let packet = w.finish().unwrap();
/// assert_eq!(packet, [0xAD, 0x00, 0x0A, 0x00, 0x03, 0xB2, b'h', b'i', 0, 0]);
/// ```
#[derive(Debug, Clone)]
pub struct PacketWriter {
    buf: Vec<u8>,
    kind: PacketLength,
}

impl PacketWriter {
    /// A packet of exactly `length` bytes, opcode included. Bytes not
    /// written are zero on [`finish`](Self::finish).
    pub fn fixed(opcode: u8, length: u16) -> Self {
        let mut buf = Vec::with_capacity(length as usize);
        buf.push(opcode);
        Self {
            buf,
            kind: PacketLength::Fixed(length),
        }
    }

    /// A packet whose big-endian length field is filled in on
    /// [`finish`](Self::finish).
    pub fn variable(opcode: u8) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[opcode, 0, 0]);
        Self {
            buf,
            kind: PacketLength::Variable,
        }
    }

    pub fn opcode(&self) -> u8 {
        self.buf[0]
    }

    /// Bytes written so far, header included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= self.kind.header_len()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    pub fn write_u16_be(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u16_le(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i16_be(&mut self, value: i16) -> &mut Self {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32_be(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32_le(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32_be(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u64_be(&mut self, value: u64) -> &mut Self {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes `text` as single-byte characters into a field of `width`
    /// bytes, truncating or NUL-padding. Characters above U+00FF become `?`.
    pub fn write_ascii(&mut self, text: &str, width: usize) -> &mut Self {
        let start = self.buf.len();
        self.buf.extend(
            text.chars()
                .take(width)
                .map(|c| u8::try_from(c).unwrap_or(b'?')),
        );
        self.buf.resize(start + width, 0);
        self
    }

    /// Writes `text` followed by a NUL terminator.
    pub fn write_ascii_nul(&mut self, text: &str) -> &mut Self {
        self.buf
            .extend(text.chars().map(|c| u8::try_from(c).unwrap_or(b'?')));
        self.write_u8(0)
    }

    /// Writes `text` as UTF-16BE into a field of `chars` code units,
    /// truncating or NUL-padding.
    pub fn write_unicode_be(&mut self, text: &str, chars: usize) -> &mut Self {
        let start = self.buf.len();
        for unit in text.encode_utf16().take(chars) {
            self.buf.extend_from_slice(&unit.to_be_bytes());
        }
        self.buf.resize(start + chars * 2, 0);
        self
    }

    /// Pads or patches the header and returns the finished packet.
    pub fn finish(self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = self.buf;
        match self.kind {
            PacketLength::Fixed(length) => {
                let declared = length as usize;
                if buf.len() > declared {
                    return Err(ProtocolError::Overflow {
                        declared,
                        written: buf.len(),
                    });
                }
                buf.resize(declared, 0);
            }
            PacketLength::Variable => {
                let length = u16::try_from(buf.len()).map_err(|_| ProtocolError::Overflow {
                    declared: u16::MAX as usize,
                    written: buf.len(),
                })?;
                debug_assert!(buf.len() >= VARIABLE_HEADER_LEN);
                buf[1..3].copy_from_slice(&length.to_be_bytes());
            }
        }
        Ok(buf)
    }
}
