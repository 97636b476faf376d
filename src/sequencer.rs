//! Gap-aware producer loop feeding an [`EventBuffer`](crate::EventBuffer).
//!
//! The sequencer remembers the id of the last accepted item. An item whose id directly follows
//! it is appended. Before the first item the expected id is the buffer's current end offset.
//! Anything else (a first id elsewhere, a jump forward after missed notifications, a duplicate
//! or an id going backwards after an upstream restart) rebases the buffer at the new id before
//! appending, so item ids and buffer offsets stay identical.

use tracing::{error, info, warn};

use crate::error::{SequencerError, WriteError};
use crate::event_buffer::Producer;
use crate::item::Item;
use crate::source::{Delivery, ItemSource};

/// Whether the sequencer has a baseline id yet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// No item accepted yet; the next one resets the buffer unless it lands on the buffer's end.
    Unsynced,
    /// Expecting `last_id + 1`.
    Synced { last_id: u64 },
}

/// How a single item was taken into the buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Accepted {
    /// Appended directly after the previous item.
    Appended,
    /// The buffer was reset to the item's id first. `previous` is the id accepted before,
    /// `None` for a first item that did not land on the buffer's end.
    Rebased { previous: Option<u64> },
}

#[must_use]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SequencerStats {
    pub accepted: u64,
    /// Resets performed, including one for a first item off the buffer's end.
    pub resets: u64,
    pub idle_polls: u64,
    pub failed_probes: u64,
}

/// Single writer of an event buffer.
#[derive(Debug)]
pub struct Sequencer<'a, P> {
    producer: Producer<'a, P>,
    last_id: Option<u64>,
    stats: SequencerStats,
}

impl<'a, P> Sequencer<'a, P> {
    pub fn new(producer: Producer<'a, P>) -> Self {
        Self {
            producer,
            last_id: None,
            stats: SequencerStats::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> SyncState {
        match self.last_id {
            None => SyncState::Unsynced,
            Some(last_id) => SyncState::Synced { last_id },
        }
    }

    #[inline]
    pub fn stats(&self) -> SequencerStats {
        self.stats
    }

    /// Take one item into the buffer, resetting it first if the id does not follow on.
    ///
    /// An item with id `u64::MAX` is refused before the buffer is touched: no offset after it
    /// exists, so it could never be stored.
    pub fn accept(&mut self, item: Item<P>) -> Result<Accepted, WriteError> {
        let id = item.id;
        if id == u64::MAX {
            return Err(WriteError::OffsetExhausted { end: id });
        }

        let expected = match self.last_id {
            Some(last_id) => last_id.checked_add(1),
            None => Some(self.producer.buffer().bounds().end),
        };

        let accepted = if expected == Some(id) {
            Accepted::Appended
        } else {
            match self.last_id {
                None => info!(next_id = id, "initial sync, resetting buffer"),
                Some(last_id) => warn!(last_id, next_id = id, "sequence gap, resetting buffer"),
            }
            self.producer.reset(id);
            self.stats.resets += 1;
            Accepted::Rebased {
                previous: self.last_id,
            }
        };

        self.producer.write(item)?;
        self.last_id = Some(id);
        self.stats.accepted += 1;
        Ok(accepted)
    }

    /// Drain `source` into the buffer until it closes.
    ///
    /// Idle intervals trigger a liveness probe, whose failure is logged and otherwise ignored.
    /// Any error from fetching an item stops the loop; dropping items silently would break the
    /// id/offset correspondence.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
    ) -> Result<SequencerStats, SequencerError<S::Error>>
    where
        S: ItemSource<P>,
    {
        loop {
            match source.next_item().await {
                Ok(Delivery::Item(item)) => {
                    if let Err(err) = self.accept(item) {
                        error!(error = %err, "item rejected, stopping sequencer");
                        return Err(err.into());
                    }
                }
                Ok(Delivery::Idle) => {
                    self.stats.idle_polls += 1;
                    if let Err(err) = source.probe().await {
                        self.stats.failed_probes += 1;
                        warn!(error = %err, "item source liveness probe failed");
                    }
                }
                Ok(Delivery::Closed) => {
                    info!(
                        accepted = self.stats.accepted,
                        resets = self.stats.resets,
                        "item source closed"
                    );
                    return Ok(self.stats);
                }
                Err(err) => {
                    error!(error = %err, "item source failed, stopping sequencer");
                    return Err(SequencerError::Source(err));
                }
            }
        }
    }
}
