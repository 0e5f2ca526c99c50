//! Single-waiter readiness signal.
//!
//! A [`ReadinessSignal`] lets one task sleep until a ring buffer has data
//! (or space) without polling. The waiter always checks the buffer before
//! arming, so a [`trigger`](ReadinessSignal::trigger) that lands while no
//! one is waiting is safely ignored: the next wait sees the bytes directly.
//!
//! ```text
//! producer                     signal                     consumer
//!    │ write_all + commit        │                           │
//!    │──── trigger(len) ────────▶│ armed? ── yes ──▶ wake ──▶│ Ok(len)
//!    │                           │        └─ no ──▶ no-op    │
//! ```
//!
//! At most one wait may be outstanding. The signal is reusable: every
//! call to [`wait`](ReadinessSignal::wait) starts from a clean slot.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;

use crate::{ByteSource, Cancelled};

/// Wait/wake primitive with exactly one waiter slot.
#[derive(Debug, Default)]
pub struct ReadinessSignal {
    waker: AtomicWaker,
    armed: AtomicBool,
    fired: AtomicBool,
    value: AtomicUsize,
    cancelled: AtomicBool,
}

impl ReadinessSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `source` has unread bytes or [`trigger`](Self::trigger)
    /// is called. Resolves immediately with `source.buffered()` when bytes
    /// are already present.
    pub fn wait<'a, S>(&'a self, source: &'a S) -> Wait<'a, impl Fn() -> usize + 'a>
    where
        S: ByteSource + ?Sized,
    {
        self.wait_until(move || source.buffered())
    }

    /// Like [`wait`](Self::wait) but with an arbitrary readiness probe.
    /// The wait resolves as soon as `ready()` returns a non-zero value.
    pub fn wait_until<F>(&self, ready: F) -> Wait<'_, F>
    where
        F: Fn() -> usize,
    {
        self.fired.store(false, Ordering::Release);
        Wait { signal: self, ready }
    }

    /// Wakes the armed waiter with `value`. No-op when nobody waits.
    pub fn trigger(&self, value: usize) {
        if self.armed.swap(false, Ordering::AcqRel) {
            self.value.store(value, Ordering::Relaxed);
            self.fired.store(true, Ordering::Release);
            self.waker.wake();
        }
    }

    /// Releases the armed waiter (and every later wait) with [`Cancelled`]
    /// until [`reset`](Self::reset) is called.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.armed.store(false, Ordering::Release);
        self.waker.wake();
    }

    /// Clears cancellation and any stale trigger so the signal can serve a
    /// new session.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
        self.fired.store(false, Ordering::Release);
        self.armed.store(false, Ordering::Release);
    }

    /// Whether a waiter is currently suspended on this signal.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Future returned by [`ReadinessSignal::wait`] and
/// [`ReadinessSignal::wait_until`].
#[must_use = "futures do nothing unless awaited"]
pub struct Wait<'a, F> {
    signal: &'a ReadinessSignal,
    ready: F,
}

// `Wait` never pins `ready` in place.
impl<F> Unpin for Wait<'_, F> {}

impl<F> Wait<'_, F>
where
    F: Fn() -> usize,
{
    fn settle(&self) -> Option<Result<usize, Cancelled>> {
        let signal = self.signal;
        if signal.cancelled.load(Ordering::Acquire) {
            return Some(Err(Cancelled));
        }
        if signal.fired.swap(false, Ordering::Acquire) {
            return Some(Ok(signal.value.load(Ordering::Relaxed)));
        }
        match (self.ready)() {
            0 => None,
            n => Some(Ok(n)),
        }
    }
}

impl<F> Future for Wait<'_, F>
where
    F: Fn() -> usize,
{
    type Output = Result<usize, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.settle() {
            this.signal.armed.store(false, Ordering::Release);
            return Poll::Ready(outcome);
        }

        this.signal.waker.register(cx.waker());
        this.signal.armed.store(true, Ordering::Release);

        // Check again: data or a cancel may have landed before we armed.
        if let Some(outcome) = this.settle() {
            this.signal.armed.store(false, Ordering::Release);
            return Poll::Ready(outcome);
        }
        Poll::Pending
    }
}

impl<F> Drop for Wait<'_, F> {
    fn drop(&mut self) {
        self.signal.armed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_without_waiter_is_noop() {
        let signal = ReadinessSignal::new();
        signal.trigger(5);
        assert!(!signal.is_armed());
        // A fresh wait must not observe the stale trigger.
        let ready = || 0;
        let mut wait = signal.wait_until(ready);
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
        assert!(signal.is_armed());
    }

    #[test]
    fn test_drop_disarms() {
        let signal = ReadinessSignal::new();
        {
            let mut wait = signal.wait_until(|| 0);
            let waker = futures_util::task::noop_waker();
            let mut cx = Context::from_waker(&waker);
            let _ = Pin::new(&mut wait).poll(&mut cx);
            assert!(signal.is_armed());
        }
        assert!(!signal.is_armed());
    }

    #[test]
    fn test_reset_clears_cancellation() {
        let signal = ReadinessSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
        signal.reset();
        assert!(!signal.is_cancelled());
    }
}
