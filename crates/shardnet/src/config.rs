//! Connection configuration.

use serde::{Deserialize, Serialize};
use shardnet_transport::{Carrier, DEFAULT_MAX_FRAME_SIZE};
use tracing::warn;

use crate::ConfigError;

/// Default size of each ring buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Opcodes whose packets carry account credentials and never reach the
/// packet log: login request and game-server login.
pub const DEFAULT_REDACTED_OPCODES: [u8; 2] = [0x80, 0x91];

/// Which carrier a connection uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierKind {
    /// `Framed` for `ws://` addresses, `Stream` otherwise.
    #[default]
    Auto,
    /// Raw TCP stream.
    Stream,
    /// WebSocket binary frames.
    Framed,
}

/// Everything a [`Connection`](crate::Connection) needs besides its
/// handlers.
///
/// Missing fields take their defaults, so a JSON document only needs the
/// values it changes:
///
/// ```
/// let config = shardnet::NetConfig::from_json(r#"{ "recv_capacity": 65536 }"#).unwrap();
/// assert_eq!(config.recv_capacity, 65536);
/// assert_eq!(config.send_capacity, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Receive ring buffer size, rounded up to a power of two.
    pub recv_capacity: usize,
    /// Send ring buffer size, rounded up to a power of two.
    pub send_capacity: usize,
    /// Injection ring buffer size, rounded up to a power of two.
    pub inject_capacity: usize,
    /// Largest single WebSocket frame accepted before the connection is
    /// dropped.
    pub max_frame_size: usize,
    pub carrier: CarrierKind,
    /// Hex-dump every packet at `trace` level on the `shardnet::packets`
    /// target.
    pub packet_log: bool,
    /// Opcodes logged as a placeholder instead of bytes.
    pub redacted_opcodes: Vec<u8>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            recv_capacity: DEFAULT_BUFFER_CAPACITY,
            send_capacity: DEFAULT_BUFFER_CAPACITY,
            inject_capacity: DEFAULT_BUFFER_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            carrier: CarrierKind::Auto,
            packet_log: false,
            redacted_opcodes: DEFAULT_REDACTED_OPCODES.to_vec(),
        }
    }
}

impl NetConfig {
    /// Parses a JSON document and validates the result.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        Ok(config.validated())
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by the connection constructors. Rules:
    /// - zero capacities fall back to [`DEFAULT_BUFFER_CAPACITY`].
    /// - `max_frame_size` is raised to at least `recv_capacity`.
    pub fn validated(mut self) -> Self {
        for (name, value) in [
            ("recv_capacity", &mut self.recv_capacity),
            ("send_capacity", &mut self.send_capacity),
            ("inject_capacity", &mut self.inject_capacity),
        ] {
            if *value == 0 {
                warn!(
                    field = name,
                    default = DEFAULT_BUFFER_CAPACITY,
                    "buffer capacity is zero, using default"
                );
                *value = DEFAULT_BUFFER_CAPACITY;
            }
        }
        if self.max_frame_size < self.recv_capacity {
            warn!(
                max_frame_size = self.max_frame_size,
                recv_capacity = self.recv_capacity,
                "max_frame_size below recv_capacity, raising"
            );
            self.max_frame_size = self.recv_capacity;
        }
        self
    }

    /// Builds the carrier for `addr` according to [`Self::carrier`].
    pub fn carrier_for(&self, addr: &str) -> Carrier {
        match self.carrier {
            CarrierKind::Auto => {
                Carrier::for_address(addr, self.recv_capacity, self.max_frame_size)
            }
            CarrierKind::Stream => Carrier::stream(),
            CarrierKind::Framed => Carrier::framed(self.recv_capacity, self.max_frame_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.recv_capacity, 4096);
        assert_eq!(config.max_frame_size, 1024 * 1024);
        assert_eq!(config.carrier, CarrierKind::Auto);
        assert_eq!(config.redacted_opcodes, vec![0x80, 0x91]);
        assert!(!config.packet_log);
    }

    #[test]
    fn test_validated_fixes_zero_capacity() {
        let config = NetConfig {
            send_capacity: 0,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.send_capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_validated_raises_frame_ceiling() {
        let config = NetConfig {
            recv_capacity: 8192,
            max_frame_size: 100,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.max_frame_size, 8192);
    }

    #[test]
    fn test_from_json_partial_document() {
        let config =
            NetConfig::from_json(r#"{ "carrier": "framed", "packet_log": true }"#).unwrap();
        assert_eq!(config.carrier, CarrierKind::Framed);
        assert!(config.packet_log);
        assert_eq!(config.inject_capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            NetConfig::from_json("{ recv_capacity: }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_carrier_selection() {
        let config = NetConfig::default();
        assert_eq!(config.carrier_for("127.0.0.1:2593").name(), "stream");
        assert_eq!(config.carrier_for("ws://127.0.0.1:2593").name(), "framed");

        let forced = NetConfig {
            carrier: CarrierKind::Stream,
            ..Default::default()
        };
        assert_eq!(forced.carrier_for("ws://127.0.0.1:2593").name(), "stream");
    }
}
