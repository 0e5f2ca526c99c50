//! Hex-dump packet logging.
//!
//! Enabled with [`NetConfig::packet_log`](crate::NetConfig::packet_log).
//! Dumps are emitted at `trace` level on the [`PACKET_LOG_TARGET`] target,
//! so they can be routed separately from the rest of the logs:
//!
//! ```text
//! RUST_LOG=shardnet::packets=trace
//! ```

use std::fmt::{self, Write};

/// `tracing` target for packet dumps.
pub const PACKET_LOG_TARGET: &str = "shardnet::packets";

/// Printed in place of the bytes of a redacted packet.
pub const REDACTED_PLACEHOLDER: &str = "[ACCOUNT CREDENTIALS HIDDEN]";

const BYTES_PER_ROW: usize = 16;
const GUTTER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inbound => "Server -> Client",
            Self::Outbound => "Client -> Server",
        })
    }
}

/// Formats packets for the log, hiding credential-bearing opcodes.
#[derive(Debug, Clone)]
pub struct PacketLogger {
    redacted: [bool; 256],
}

impl PacketLogger {
    pub fn new(redacted_opcodes: &[u8]) -> Self {
        let mut redacted = [false; 256];
        for &op in redacted_opcodes {
            redacted[op as usize] = true;
        }
        Self { redacted }
    }

    pub fn is_redacted(&self, opcode: u8) -> bool {
        self.redacted[opcode as usize]
    }

    /// Renders `packet` as a hex dump, or the redaction placeholder.
    pub fn render(&self, packet: &[u8]) -> String {
        match packet.first() {
            Some(&op) if self.is_redacted(op) => REDACTED_PLACEHOLDER.to_string(),
            _ => hex_dump(packet),
        }
    }

    pub fn log(&self, direction: Direction, packet: &[u8]) {
        if packet.is_empty() || !tracing::enabled!(target: PACKET_LOG_TARGET, tracing::Level::TRACE)
        {
            return;
        }
        tracing::trace!(
            target: PACKET_LOG_TARGET,
            %direction,
            opcode = format_args!("{:02X}", packet[0]),
            len = packet.len(),
            "\n{}",
            self.render(packet)
        );
    }
}

/// Classic 16-bytes-per-row dump: offset column, two groups of eight hex
/// bytes, and an ASCII column with `.` for anything unprintable.
pub fn hex_dump(bytes: &[u8]) -> String {
    let rows = bytes.len().div_ceil(BYTES_PER_ROW);
    let mut out = String::with_capacity((rows + 2) * 80);

    let pad = " ".repeat(GUTTER);
    out.push_str(&pad);
    out.push_str("0  1  2  3  4  5  6  7   8  9  A  B  C  D  E  F\n");
    out.push_str(&pad);
    out.push_str("-- -- -- -- -- -- -- --  -- -- -- -- -- -- -- --\n");

    for (row, chunk) in bytes.chunks(BYTES_PER_ROW).enumerate() {
        let _ = write!(out, "{:08X}", row * BYTES_PER_ROW);
        for col in 0..BYTES_PER_ROW {
            if col % 8 == 0 {
                out.push(' ');
            }
            match chunk.get(col) {
                Some(b) => {
                    let _ = write!(out, " {b:02X}");
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  ");
        out.extend(chunk.iter().map(|&b| {
            if (0x20..0x80).contains(&b) {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}
