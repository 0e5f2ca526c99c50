//! Connects to a shard, pings it on a timer, and logs every packet.
//!
//! ```text
//! cargo run -p probe -- 127.0.0.1:2593
//! cargo run -p probe -- ws://127.0.0.1:2594 --lengths lengths.json
//! RUST_LOG=info,shardnet::packets=trace cargo run -p probe -- 127.0.0.1:2593 --packet-log
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use shardnet::{
    ByteCursor, Connection, Dispatcher, HandlerTable, NetConfig, PacketLengths,
    PacketWriter, ProtocolError,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const PING: u8 = 0x73;
const ASCII_MESSAGE: u8 = 0x1C;
const UNICODE_MESSAGE: u8 = 0xAE;

/// shardnet probe
#[derive(Parser)]
#[command(name = "probe")]
#[command(about = "Connect to a shard and log what it sends", long_about = None)]
struct Cli {
    /// Server address: host:port, tcp://host:port, or ws://host:port
    address: String,

    /// JSON network config (see `NetConfig`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON array of up to 256 packet lengths (-1 variable, 0 unknown)
    #[arg(short, long)]
    lengths: Option<PathBuf>,

    /// Milliseconds between ticks
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Seconds between pings
    #[arg(long, default_value_t = 5)]
    ping_secs: u64,

    /// Hex-dump every packet on the `shardnet::packets` target
    #[arg(long)]
    packet_log: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Enough of a shard's table to hold a conversation: ping plus the two
/// speech packets.
fn builtin_lengths() -> PacketLengths {
    PacketLengths::new()
        .with_fixed(PING, 2)
        .with_variable(ASCII_MESSAGE)
        .with_variable(UNICODE_MESSAGE)
}

fn load_lengths(path: Option<&PathBuf>) -> anyhow::Result<PacketLengths> {
    let Some(path) = path else {
        return Ok(builtin_lengths());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let table: Vec<i16> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    let lengths = PacketLengths::from_table(&table);
    tracing::info!(known = lengths.known(), "packet length table loaded");
    Ok(lengths)
}

fn load_config(cli: &Cli) -> anyhow::Result<NetConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            NetConfig::from_json(&text)?
        }
        None => NetConfig::default(),
    };
    config.packet_log |= cli.packet_log;
    Ok(config)
}

/// Both speech packets open with serial, graphic, type, hue and font.
fn skip_speaker(c: &mut ByteCursor<'_>) -> Result<(), ProtocolError> {
    c.skip(4 + 2 + 1 + 2 + 2)
}

fn register_handlers(conn: &mut Connection, last_pong: Arc<AtomicU8>) {
    conn.register_handler(PING, move |c| {
        let seq = c.read_u8()?;
        last_pong.store(seq, Ordering::Relaxed);
        tracing::info!(seq, "pong");
        Ok(())
    });

    conn.register_handler(ASCII_MESSAGE, |c| {
        skip_speaker(c)?;
        let name = c.read_ascii(30)?;
        let text = c.read_ascii_nul()?;
        tracing::info!(%name, %text, "message");
        Ok(())
    });

    conn.register_handler(UNICODE_MESSAGE, |c| {
        skip_speaker(c)?;
        c.skip(4)?; // language
        let name = c.read_ascii(30)?;
        let chars = c.remaining() / 2;
        let text = c.read_unicode_be(chars)?;
        tracing::info!(%name, %text, "unicode message");
        Ok(())
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = load_config(&cli)?;
    let lengths = load_lengths(cli.lengths.as_ref())?;
    let mut conn = Connection::new(config, Dispatcher::new(lengths, HandlerTable::new()));

    let last_pong = Arc::new(AtomicU8::new(0));
    register_handlers(&mut conn, Arc::clone(&last_pong));
    let mut events = conn.subscribe();

    conn.connect(&cli.address)
        .await
        .with_context(|| format!("connecting to {}", cli.address))?;
    tracing::info!(
        address = %cli.address,
        local_ip = format_args!("{:#010x}", conn.local_ip()),
        "probe connected"
    );

    let mut tick = tokio::time::interval(Duration::from_millis(cli.tick_ms.max(1)));
    let mut ping = tokio::time::interval(Duration::from_secs(cli.ping_secs.max(1)));
    let mut seq: u8 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = conn.process() {
                    tracing::error!(error = %e, "dispatch failed");
                }
            }
            _ = ping.tick() => {
                seq = seq.wrapping_add(1);
                let mut packet = PacketWriter::fixed(PING, 2);
                packet.write_u8(seq);
                if let Err(e) = conn.send_packet(packet) {
                    tracing::warn!(error = %e, "ping not sent");
                }
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    tracing::info!(reason = %event.reason, message = %event.message, "session ended");
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    let stats = conn.statistics();
    conn.disconnect().await?;
    tracing::info!(
        bytes_received = stats.bytes_received,
        bytes_sent = stats.bytes_sent,
        packets_received = stats.packets_received,
        packets_sent = stats.packets_sent,
        last_pong = last_pong.load(Ordering::Relaxed),
        "probe finished"
    );
    Ok(())
}
