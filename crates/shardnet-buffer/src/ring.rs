//! Fixed-capacity circular byte store.
//!
//! Capacity is always a power of two. The read and write cursors only ever
//! grow (with wrapping arithmetic) and are mapped onto the backing array
//! with `cursor & mask`, so `write - read` is the number of unread bytes
//! without any "full vs. empty" ambiguity.
//!
//! ```text
//!            read & mask            write & mask
//!                 │                      │
//!   [ . . . . . . R R R R R R R R R R R W . . . . ]
//!                 └──── readable ───────┘└─ writable ┘
//! ```
//!
//! Regions handed out by [`RingBuffer::writable_region`] and
//! [`RingBuffer::readable_region`] are the largest *contiguous* spans
//! starting at the respective cursor. When data straddles the end of the
//! backing array the caller sees the first span, commits it, and asks
//! again for the rest.
//!
//! A buffer can be [`split`](RingBuffer::split) into a [`Producer`] and a
//! [`Consumer`] for single-producer/single-consumer use across tasks. The
//! halves publish cursor updates with release/acquire ordering and need no
//! lock.

use std::cell::UnsafeCell;
use std::fmt;
use std::slice;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::BufferError;

// ---------------------------------------------------------------------------
// Shared storage
// ---------------------------------------------------------------------------

struct Shared {
    storage: Box<[UnsafeCell<u8>]>,
    mask: usize,
    read: AtomicUsize,
    write: AtomicUsize,
}

// SAFETY: the producer only touches bytes in `[write, read + capacity)` and
// the consumer only touches bytes in `[read, write)`. Those ranges never
// overlap, and each cursor is published with `Release` after the bytes it
// covers have been written or read.
unsafe impl Sync for Shared {}

impl Shared {
    fn with_capacity(requested: usize) -> Self {
        let capacity = requested.max(1).next_power_of_two();
        let storage = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            storage,
            mask: capacity - 1,
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn len(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.capacity())
    }

    fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    /// # Safety
    /// Only the producing side may call this, and it must not hold another
    /// writable region at the same time.
    #[allow(clippy::mut_from_ref)]
    unsafe fn writable(&self) -> &mut [u8] {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let free = self.capacity() - write.wrapping_sub(read);
        let start = write & self.mask;
        let len = free.min(self.capacity() - start);
        // SAFETY: `start + len <= capacity` and the span is owned by the
        // producer until `commit_write` publishes it.
        unsafe { slice::from_raw_parts_mut(self.base().add(start), len) }
    }

    fn commit_write(&self, n: usize) -> Result<(), BufferError> {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let available = self.capacity() - write.wrapping_sub(read);
        if n > available {
            return Err(BufferError::Overcommit { requested: n, available });
        }
        self.write.store(write.wrapping_add(n), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Only the consuming side may call this.
    unsafe fn readable(&self) -> &[u8] {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let len = write.wrapping_sub(read);
        let start = read & self.mask;
        let len = len.min(self.capacity() - start);
        // SAFETY: the span lies inside `[read, write)`, which the producer
        // does not touch until `commit_read` releases it.
        unsafe { slice::from_raw_parts(self.base().add(start), len) }
    }

    fn commit_read(&self, n: usize) -> Result<(), BufferError> {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let available = write.wrapping_sub(read);
        if n > available {
            return Err(BufferError::Underflow { requested: n, available });
        }
        self.read.store(read.wrapping_add(n), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Only the consuming side may call this.
    unsafe fn peek(&self, offset: usize) -> Option<u8> {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        if offset >= write.wrapping_sub(read) {
            return None;
        }
        let index = read.wrapping_add(offset) & self.mask;
        // SAFETY: `index` addresses an unread byte.
        Some(unsafe { *self.base().add(index) })
    }

    /// # Safety
    /// Only the consuming side may call this.
    unsafe fn copy_to(&self, dst: &mut [u8]) -> usize {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let total = write.wrapping_sub(read).min(dst.len());
        let start = read & self.mask;
        let first = total.min(self.capacity() - start);
        // SAFETY: both spans lie inside `[read, write)`.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base().add(start), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(self.base(), dst.as_mut_ptr().add(first), total - first);
        }
        total
    }

    /// # Safety
    /// Only the producing side may call this.
    unsafe fn write_all(&self, mut data: &[u8]) -> Result<(), BufferError> {
        let available = self.free();
        if data.len() > available {
            return Err(BufferError::Overcommit { requested: data.len(), available });
        }
        while !data.is_empty() {
            // SAFETY: forwarded from the caller.
            let region = unsafe { self.writable() };
            let n = region.len().min(data.len());
            region[..n].copy_from_slice(&data[..n]);
            self.commit_write(n)?;
            data = &data[n..];
        }
        Ok(())
    }

    fn discard(&self) {
        let write = self.write.load(Ordering::Acquire);
        self.read.store(write, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// ByteSource
// ---------------------------------------------------------------------------

/// Read side of a ring buffer, as seen by a framing consumer.
///
/// Implemented by [`RingBuffer`] and [`Consumer`] so the same dispatch code
/// can drain either a locally owned buffer or the consuming half of a split
/// one.
pub trait ByteSource {
    /// Unread bytes.
    fn buffered(&self) -> usize;

    /// Total capacity of the backing array.
    fn capacity(&self) -> usize;

    /// Largest contiguous unread span starting at the read cursor.
    fn readable_region(&self) -> &[u8];

    /// Unread byte at `offset` from the read cursor, if buffered.
    fn peek(&self, offset: usize) -> Option<u8>;

    /// Copies up to `dst.len()` unread bytes without consuming them.
    /// Returns the number of bytes copied.
    fn copy_to(&self, dst: &mut [u8]) -> usize;

    /// Consumes `n` bytes.
    fn commit_read(&mut self, n: usize) -> Result<(), BufferError>;
}

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A single-owner ring buffer.
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Creates a buffer of at least `requested` bytes, rounded up to the
    /// next power of two (minimum 1).
    pub fn new(requested: usize) -> Self {
        Self {
            shared: Arc::new(Shared::with_capacity(requested)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Unread byte count.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free byte count (`capacity() - len()`).
    pub fn free(&self) -> usize {
        self.shared.free()
    }

    /// Largest contiguous free span at the write cursor. Write into it and
    /// then call [`commit_write`](Self::commit_write).
    pub fn writable_region(&mut self) -> &mut [u8] {
        // SAFETY: `&mut self` makes us the only producer.
        unsafe { self.shared.writable() }
    }

    /// Publishes `n` bytes written into the writable region.
    pub fn commit_write(&mut self, n: usize) -> Result<(), BufferError> {
        self.shared.commit_write(n)
    }

    /// Largest contiguous unread span at the read cursor.
    pub fn readable_region(&self) -> &[u8] {
        // SAFETY: an unsplit buffer has no concurrent producer.
        unsafe { self.shared.readable() }
    }

    /// Consumes `n` unread bytes.
    pub fn commit_read(&mut self, n: usize) -> Result<(), BufferError> {
        self.shared.commit_read(n)
    }

    /// Appends all of `data`, wrapping as needed. Nothing is written when
    /// `data` does not fit.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), BufferError> {
        // SAFETY: `&mut self` makes us the only producer.
        unsafe { self.shared.write_all(data) }
    }

    /// Copies unread bytes into `dst` and consumes them.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.copy_to(dst);
        // `n` never exceeds `len()`, so the commit cannot fail.
        let _ = self.shared.commit_read(n);
        n
    }

    /// Resets both cursors to zero, dropping unread bytes.
    pub fn clear(&mut self) {
        self.shared.read.store(0, Ordering::Release);
        self.shared.write.store(0, Ordering::Release);
    }

    /// Replaces the backing array with one of at least `min_capacity` bytes
    /// and moves unread bytes to its front. Does nothing when the current
    /// capacity is already large enough.
    pub fn grow(&mut self, min_capacity: usize) {
        if min_capacity <= self.capacity() {
            return;
        }
        let mut next = Self::new(min_capacity);
        let len = self.len();
        let region = next.writable_region();
        let copied = self.copy_to(&mut region[..len]);
        debug_assert_eq!(copied, len);
        let _ = next.commit_write(copied);
        tracing::trace!(
            from = self.capacity(),
            to = next.capacity(),
            moved = copied,
            "ring buffer grown"
        );
        *self = next;
    }

    /// Splits the buffer into a producer and a consumer half.
    pub fn split(self) -> (Producer, Consumer) {
        let producer = Producer {
            shared: Arc::clone(&self.shared),
        };
        let consumer = Consumer {
            shared: self.shared,
        };
        (producer, consumer)
    }

    /// Rejoins the halves produced by [`split`](Self::split).
    pub fn reunite(producer: Producer, consumer: Consumer) -> Result<Self, BufferError> {
        if !Arc::ptr_eq(&producer.shared, &consumer.shared) {
            return Err(BufferError::Mismatched);
        }
        drop(producer);
        Ok(Self {
            shared: consumer.shared,
        })
    }
}

impl ByteSource for RingBuffer {
    fn buffered(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    fn readable_region(&self) -> &[u8] {
        RingBuffer::readable_region(self)
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        // SAFETY: an unsplit buffer has no concurrent producer.
        unsafe { self.shared.peek(offset) }
    }

    fn copy_to(&self, dst: &mut [u8]) -> usize {
        // SAFETY: as above.
        unsafe { self.shared.copy_to(dst) }
    }

    fn commit_read(&mut self, n: usize) -> Result<(), BufferError> {
        RingBuffer::commit_read(self, n)
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Producer / Consumer
// ---------------------------------------------------------------------------

/// Writing half of a split [`RingBuffer`].
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free(&self) -> usize {
        self.shared.free()
    }

    pub fn writable_region(&mut self) -> &mut [u8] {
        // SAFETY: there is exactly one `Producer` per buffer and `&mut self`
        // excludes overlapping regions.
        unsafe { self.shared.writable() }
    }

    pub fn commit_write(&mut self, n: usize) -> Result<(), BufferError> {
        self.shared.commit_write(n)
    }

    /// Appends all of `data` or nothing.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), BufferError> {
        // SAFETY: see `writable_region`.
        unsafe { self.shared.write_all(data) }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("free", &self.free())
            .finish()
    }
}

/// Reading half of a split [`RingBuffer`].
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every unread byte by moving the read cursor up to the write
    /// cursor.
    pub fn clear(&mut self) {
        self.shared.discard();
    }
}

impl ByteSource for Consumer {
    fn buffered(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    fn readable_region(&self) -> &[u8] {
        // SAFETY: there is exactly one `Consumer` per buffer.
        unsafe { self.shared.readable() }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        // SAFETY: as above.
        unsafe { self.shared.peek(offset) }
    }

    fn copy_to(&self, dst: &mut [u8]) -> usize {
        // SAFETY: as above.
        unsafe { self.shared.copy_to(dst) }
    }

    fn commit_read(&mut self, n: usize) -> Result<(), BufferError> {
        self.shared.commit_read(n)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.shared.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_up_to_power_of_two() {
        assert_eq!(RingBuffer::new(0).capacity(), 1);
        assert_eq!(RingBuffer::new(5).capacity(), 8);
        assert_eq!(RingBuffer::new(8).capacity(), 8);
        assert_eq!(RingBuffer::new(4000).capacity(), 4096);
    }

    #[test]
    fn test_commit_write_past_free_space_is_rejected() {
        let mut buf = RingBuffer::new(4);
        buf.write_all(&[1, 2, 3]).unwrap();
        let err = buf.commit_write(2).unwrap_err();
        assert_eq!(err, BufferError::Overcommit { requested: 2, available: 1 });
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_commit_read_past_len_is_rejected() {
        let mut buf = RingBuffer::new(4);
        buf.write_all(&[1]).unwrap();
        let err = buf.commit_read(2).unwrap_err();
        assert_eq!(err, BufferError::Underflow { requested: 2, available: 1 });
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_write_all_rejects_oversized_payload_without_writing() {
        let mut buf = RingBuffer::new(4);
        assert!(buf.write_all(&[0; 5]).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_clear_resets_cursors() {
        let mut buf = RingBuffer::new(8);
        buf.write_all(&[1, 2, 3, 4, 5]).unwrap();
        buf.commit_read(3).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        // After a reset the writable region starts at index 0 again.
        assert_eq!(buf.writable_region().len(), 8);
    }

    #[test]
    fn test_peek_and_copy_across_wrap() {
        let mut buf = RingBuffer::new(4);
        buf.write_all(&[0, 0, 0]).unwrap();
        buf.commit_read(3).unwrap();
        buf.write_all(&[7, 8, 9]).unwrap();
        assert_eq!(buf.peek(0), Some(7));
        assert_eq!(buf.peek(2), Some(9));
        assert_eq!(buf.peek(3), None);
        let mut out = [0u8; 3];
        assert_eq!(buf.copy_to(&mut out), 3);
        assert_eq!(out, [7, 8, 9]);
        // copy_to does not consume
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_grow_moves_unread_bytes_to_front() {
        let mut buf = RingBuffer::new(4);
        buf.write_all(&[0, 0, 0]).unwrap();
        buf.commit_read(3).unwrap();
        buf.write_all(&[1, 2, 3]).unwrap();
        buf.grow(9);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.readable_region(), &[1, 2, 3]);
        buf.write_all(&[4; 10]).unwrap();
        assert_eq!(buf.len(), 13);
    }

    #[test]
    fn test_grow_never_shrinks() {
        let mut buf = RingBuffer::new(16);
        buf.grow(4);
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn test_split_and_reunite() {
        let buf = RingBuffer::new(8);
        let (mut producer, consumer) = buf.split();
        producer.write_all(b"abc").unwrap();
        assert_eq!(consumer.readable_region(), b"abc");
        let buf = RingBuffer::reunite(producer, consumer).unwrap();
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_reunite_rejects_foreign_halves() {
        let (p1, _c1) = RingBuffer::new(8).split();
        let (_p2, c2) = RingBuffer::new(8).split();
        assert_eq!(
            RingBuffer::reunite(p1, c2).unwrap_err(),
            BufferError::Mismatched
        );
    }

    #[test]
    fn test_consumer_clear_discards_unread() {
        let (mut producer, mut consumer) = RingBuffer::new(8).split();
        producer.write_all(&[1, 2, 3]).unwrap();
        consumer.clear();
        assert!(consumer.is_empty());
        assert_eq!(producer.free(), 8);
    }
}
