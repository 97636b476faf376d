//! Error types for reads, sequencing and configuration.

use thiserror::Error;

/// Why a read returned no items.
///
/// Every variant carries enough to compute where the caller continues from,
/// see [`ReadError::resume_offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The requested offset has already been evicted or discarded by a reset.
    #[error("requested offset {requested} is behind buffer start {start} (missed {})", gap(.requested, .start))]
    FellBehind { requested: u64, start: u64 },

    /// The requested offset lies past the end of the window.
    #[error("requested offset {requested} is ahead of buffer end {end}")]
    TooFarAhead { requested: u64, end: u64 },

    /// The cancel signal fired while the read was waiting for new items.
    #[error("read at offset {requested} cancelled while waiting")]
    Cancelled { requested: u64 },
}

fn gap(requested: &u64, start: &u64) -> u64 {
    start.saturating_sub(*requested)
}

impl ReadError {
    /// Offset the caller must continue reading from.
    ///
    /// For [`ReadError::FellBehind`] this is the current window start; the
    /// skipped offsets are gone for good.
    pub fn resume_offset(&self) -> u64 {
        match *self {
            ReadError::FellBehind { start, .. } => start,
            ReadError::TooFarAhead { requested, .. } => requested,
            ReadError::Cancelled { requested } => requested,
        }
    }

    /// Number of offsets that can no longer be read.
    pub fn missed(&self) -> u64 {
        match *self {
            ReadError::FellBehind { requested, start } => gap(&requested, &start),
            _ => 0,
        }
    }

    #[inline]
    pub fn is_fell_behind(&self) -> bool {
        matches!(self, ReadError::FellBehind { .. })
    }
}

/// Why a write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The window already ends at the last representable offset.
    #[error("offset space exhausted: cannot write at offset {end}")]
    OffsetExhausted { end: u64 },
}

/// Fatal errors that stop the sequencer loop.
#[derive(Debug, Error)]
pub enum SequencerError<E> {
    /// The item source failed (malformed item, lost connection, ...).
    #[error("item source failed: {0}")]
    Source(#[source] E),

    #[error("item could not be written: {0}")]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("buffer capacity must be greater than zero")]
    ZeroCapacity,

    #[error("idle interval must be greater than zero")]
    ZeroIdleInterval,
}
