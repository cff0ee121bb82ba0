//! Backpressure for a connection's outbound queue.
//!
//! Tracks frames handed to the writer task but not yet written. Once
//! `max_pending` is reached, [`Backpressure::reserve`] waits for the writer
//! to release slots, up to a timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Result, ServerError};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default wait for a free slot.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Inner {
    pending: AtomicUsize,
    max_pending: usize,
    timeout: Duration,
    released: Notify,
}

/// Shared pending-frame counter. Clones observe the same count.
#[derive(Debug, Clone)]
pub struct Backpressure {
    inner: Arc<Inner>,
}

impl Backpressure {
    /// Controller with the given limit and wait timeout.
    pub fn new(max_pending: usize, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(0),
                max_pending: max_pending.max(1),
                timeout,
                released: Notify::new(),
            }),
        }
    }

    /// Reserve a slot if one is free.
    pub fn try_reserve(&self) -> bool {
        let max = self.inner.max_pending;
        self.inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    /// Reserve a slot, waiting up to the timeout.
    ///
    /// # Errors
    ///
    /// [`ServerError::BackpressureTimeout`] if no slot frees up in time.
    pub async fn reserve(&self) -> Result<()> {
        let deadline = Instant::now() + self.inner.timeout;

        loop {
            // Register interest before checking so a release in between is not missed.
            let released = self.inner.released.notified();
            if self.try_reserve() {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(ServerError::BackpressureTimeout);
            }
        }
    }

    /// Release `count` slots after their frames were written.
    pub fn release(&self, count: usize) {
        let _ = self
            .inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
        self.inner.released.notify_waiters();
    }

    /// Frames currently pending.
    #[inline]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// True while at the limit.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending() >= self.inner.max_pending
    }

    /// Configured limit.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.inner.max_pending
    }
}

impl Default for Backpressure {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING, DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_reserve_up_to_limit() {
        let bp = Backpressure::new(2, DEFAULT_TIMEOUT);

        assert!(bp.try_reserve());
        assert!(bp.try_reserve());
        assert!(!bp.try_reserve());
        assert!(bp.is_active());
        assert_eq!(bp.pending(), 2);
    }

    #[test]
    fn test_release_many() {
        let bp = Backpressure::new(4, DEFAULT_TIMEOUT);
        for _ in 0..4 {
            assert!(bp.try_reserve());
        }

        bp.release(3);
        assert_eq!(bp.pending(), 1);

        bp.release(10);
        assert_eq!(bp.pending(), 0);
    }

    #[tokio::test]
    async fn test_reserve_waits_for_release() {
        let bp = Backpressure::new(1, Duration::from_secs(5));
        assert!(bp.try_reserve());

        let waiter = {
            let bp = bp.clone();
            tokio::spawn(async move { bp.reserve().await })
        };

        tokio::task::yield_now().await;
        bp.release(1);

        waiter.await.unwrap().unwrap();
        assert_eq!(bp.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_times_out() {
        let bp = Backpressure::new(1, Duration::from_millis(20));
        assert!(bp.try_reserve());

        let result = bp.reserve().await;
        assert!(matches!(result, Err(ServerError::BackpressureTimeout)));
    }

    #[test]
    fn test_zero_limit_clamped() {
        let bp = Backpressure::new(0, DEFAULT_TIMEOUT);
        assert_eq!(bp.max_pending(), 1);
        assert!(bp.try_reserve());
    }
}
