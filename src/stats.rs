//! Lock-free counters describing buffer activity.

#[cfg(not(feature = "portable-atomic"))]
use core::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "portable-atomic")]
use portable_atomic::{AtomicU64, Ordering};

/// Snapshot of [`Counters`] at one point in time.
#[must_use]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub writes: u64,
    pub resets: u64,
    /// Reads that ended with a fell-behind error.
    pub fell_behind: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    writes: AtomicU64,
    resets: AtomicU64,
    fell_behind: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_fell_behind(&self) {
        self.fell_behind.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BufferStats {
        BufferStats {
            writes: self.writes.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            fell_behind: self.fell_behind.load(Ordering::Relaxed),
        }
    }
}
