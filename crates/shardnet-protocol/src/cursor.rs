//! Bounds-checked reader over one framed packet.

use crate::ProtocolError;

/// Read-only cursor over the bytes of a single packet.
///
/// The cursor borrows the packet; it never copies. When built by the
/// dispatcher its position starts just past the header (opcode, plus the
/// two length bytes for variable-length packets), so handlers begin at the
/// first payload byte.
///
/// Every read checks bounds and returns [`ProtocolError::UnexpectedEof`]
/// instead of panicking. A failed read does not move the cursor.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    header: usize,
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// A cursor over arbitrary bytes, positioned at the start.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            header: 0,
            pos: 0,
        }
    }

    /// A cursor over a whole packet whose first `header` bytes are framing.
    pub(crate) fn framed(packet: &'a [u8], header: usize) -> Self {
        let header = header.min(packet.len());
        Self {
            data: packet,
            header,
            pos: header,
        }
    }

    /// Opcode byte, when the cursor covers a framed packet.
    pub fn opcode(&self) -> Option<u8> {
        (self.header > 0).then(|| self.data[0])
    }

    /// The whole packet, header included.
    pub fn packet(&self) -> &'a [u8] {
        self.data
    }

    /// The bytes after the header.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header..]
    }

    /// Bytes not yet read.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Moves to an absolute offset within the packet.
    pub fn seek(&mut self, pos: usize) -> Result<(), ProtocolError> {
        if pos > self.data.len() {
            return Err(ProtocolError::UnexpectedEof {
                needed: pos - self.pos,
                remaining: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<(), ProtocolError> {
        self.bytes(count).map(|_| ())
    }

    /// Borrows the next `count` bytes.
    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(ProtocolError::UnexpectedEof {
                needed: count,
                remaining,
            });
        }
        let out = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(i8::from_be_bytes(self.array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_i16_be(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn read_i16_le(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_i32_be(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Reads a fixed-width single-byte string field. Characters after the
    /// first NUL are dropped; bytes map to chars one-to-one (Latin-1).
    pub fn read_ascii(&mut self, width: usize) -> Result<String, ProtocolError> {
        let raw = self.bytes(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(raw[..end].iter().map(|&b| b as char).collect())
    }

    /// Reads a NUL-terminated single-byte string, consuming the terminator.
    /// A missing terminator reads to the end of the packet.
    pub fn read_ascii_nul(&mut self) -> Result<String, ProtocolError> {
        let rest = self.rest();
        let end = rest.iter().position(|&b| b == 0);
        let text = rest[..end.unwrap_or(rest.len())]
            .iter()
            .map(|&b| b as char)
            .collect();
        self.pos += end.map_or(rest.len(), |e| e + 1);
        Ok(text)
    }

    /// Reads a fixed-width UTF-16BE string of `chars` code units. Stops at
    /// the first NUL unit; invalid surrogates become U+FFFD.
    pub fn read_unicode_be(&mut self, chars: usize) -> Result<String, ProtocolError> {
        let needed = chars.checked_mul(2).ok_or(ProtocolError::UnexpectedEof {
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        let raw = self.bytes(needed)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framed_cursor_starts_after_header() {
        let packet = [0xB0, 0x00, 0x06, 0x01, 0x02, 0x03];
        let mut c = ByteCursor::framed(&packet, 3);
        assert_eq!(c.opcode(), Some(0xB0));
        assert_eq!(c.payload(), &[1, 2, 3]);
        assert_eq!(c.packet().len(), 6);
        assert_eq!(c.read_u8().unwrap(), 1);
        assert_eq!(c.remaining(), 2);
    }

    #[test]
    fn test_plain_cursor_has_no_opcode() {
        let c = ByteCursor::new(&[1, 2]);
        assert_eq!(c.opcode(), None);
        assert_eq!(c.payload(), &[1, 2]);
    }

    #[test]
    fn test_integer_reads_in_both_orders() {
        let data = [0x12, 0x34, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_u16_be().unwrap(), 0x1234);
        assert_eq!(c.read_u16_le().unwrap(), 0x3412);
        assert_eq!(c.read_u32_be().unwrap(), 0xDEAD_BEEF);
        assert_eq!(c.read_i8().unwrap(), -1);
        assert!(c.rest().is_empty());
    }

    #[test]
    fn test_failed_read_does_not_advance() {
        let mut c = ByteCursor::new(&[1, 2, 3]);
        c.skip(2).unwrap();
        assert_eq!(
            c.read_u16_be(),
            Err(ProtocolError::UnexpectedEof { needed: 2, remaining: 1 })
        );
        assert_eq!(c.position(), 2);
        assert_eq!(c.read_u8().unwrap(), 3);
    }

    #[test]
    fn test_seek_bounds() {
        let mut c = ByteCursor::new(&[1, 2, 3]);
        c.seek(3).unwrap();
        assert_eq!(c.remaining(), 0);
        assert!(c.seek(4).is_err());
        c.seek(0).unwrap();
        assert_eq!(c.read_u8().unwrap(), 1);
    }

    #[test]
    fn test_ascii_fields() {
        let mut c = ByteCursor::new(b"Bob\0\0\0Alice\0tail");
        assert_eq!(c.read_ascii(6).unwrap(), "Bob");
        assert_eq!(c.read_ascii_nul().unwrap(), "Alice");
        assert_eq!(c.read_ascii_nul().unwrap(), "tail");
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn test_unicode_be_field() {
        let data = [0x00, b'H', 0x00, b'i', 0x00, 0x00, 0x00, b'x'];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_unicode_be(4).unwrap(), "Hi");
        assert_eq!(c.remaining(), 0);
    }
}
