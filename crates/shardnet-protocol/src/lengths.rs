//! Static opcode → packet length table.

/// Bytes in front of every variable-length payload: opcode + u16 length.
pub const VARIABLE_HEADER_LEN: usize = 3;

/// How long a packet with a given opcode is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Total size in bytes, opcode included.
    Fixed(u16),
    /// A big-endian `u16` after the opcode carries the total size, opcode
    /// included.
    Variable,
}

impl PacketLength {
    /// Header size that precedes the payload for this kind.
    pub fn header_len(self) -> usize {
        match self {
            Self::Fixed(_) => 1,
            Self::Variable => VARIABLE_HEADER_LEN,
        }
    }
}

/// Length table for all 256 opcodes. Opcodes without an entry are
/// unknown, and meeting one on the wire is a framing error.
#[derive(Debug, Clone)]
pub struct PacketLengths {
    entries: [Option<PacketLength>; 256],
}

impl PacketLengths {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            entries: [None; 256],
        }
    }

    /// Builds a table from the classic signed encoding: index is the
    /// opcode, `-1` marks variable length, `0` (or any other negative)
    /// marks unknown, and a positive value is the fixed length. Entries
    /// past index 255 are ignored.
    pub fn from_table(table: &[i16]) -> Self {
        let mut lengths = Self::new();
        for (opcode, &raw) in table.iter().take(256).enumerate() {
            let entry = match raw {
                -1 => Some(PacketLength::Variable),
                n if n > 0 => Some(PacketLength::Fixed(n as u16)),
                _ => None,
            };
            lengths.entries[opcode] = entry;
        }
        lengths
    }

    pub fn with_fixed(mut self, opcode: u8, length: u16) -> Self {
        self.set(opcode, Some(PacketLength::Fixed(length)));
        self
    }

    pub fn with_variable(mut self, opcode: u8) -> Self {
        self.set(opcode, Some(PacketLength::Variable));
        self
    }

    pub fn set(&mut self, opcode: u8, length: Option<PacketLength>) {
        self.entries[opcode as usize] = length;
    }

    pub fn get(&self, opcode: u8) -> Option<PacketLength> {
        self.entries[opcode as usize]
    }

    /// Number of opcodes with a known length.
    pub fn known(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

impl Default for PacketLengths {
    fn default() -> Self {
        Self::new()
    }
}
