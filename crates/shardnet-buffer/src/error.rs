//! Error types for the buffer layer.

/// Errors raised by ring-buffer cursor operations.
///
/// Every variant describes a caller bug or a reunite mismatch. None of them
/// leave the buffer modified: a rejected commit does not move a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// `commit_write` was asked to publish more bytes than are free.
    #[error("commit of {requested} bytes exceeds {available} free bytes")]
    Overcommit {
        /// Bytes the caller tried to commit.
        requested: usize,
        /// Free bytes at the time of the call.
        available: usize,
    },

    /// `commit_read` was asked to consume more bytes than are buffered.
    #[error("read of {requested} bytes exceeds {available} buffered bytes")]
    Underflow {
        /// Bytes the caller tried to consume.
        requested: usize,
        /// Unread bytes at the time of the call.
        available: usize,
    },

    /// `reunite` was given halves that came from different buffers.
    #[error("producer and consumer belong to different ring buffers")]
    Mismatched,
}

/// Outcome of a [`ReadinessSignal`](crate::ReadinessSignal) wait that was
/// released by `cancel()` instead of by data or a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait cancelled")]
pub struct Cancelled;
