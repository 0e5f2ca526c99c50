//! Byte buffering primitives for shardnet.
//!
//! - **[`RingBuffer`]**: power-of-two circular byte store with direct
//!   access to its contiguous readable/writable regions. Split it into a
//!   [`Producer`] and a [`Consumer`] to hand each side to a different task.
//! - **[`ReadinessSignal`]**: single-waiter wake primitive used to park a
//!   task until a buffer has bytes (or free space).
//! - **[`ByteSource`]**: the read-side contract the packet dispatcher
//!   drains.
//!
//! ```text
//! receive loop ──write──▶ Producer ═══ ring ═══ Consumer ──read──▶ dispatcher
//!                              └──── ReadinessSignal::trigger ─────▶ waiter
//! ```

mod error;
mod ring;
mod signal;

pub use error::{BufferError, Cancelled};
pub use ring::{ByteSource, Consumer, Producer, RingBuffer};
pub use signal::{ReadinessSignal, Wait};
