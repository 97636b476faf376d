//! Bounded event window for fanning one ordered stream out to many readers.
//!
//! # Highlights
//! - Fixed-capacity window indexed by monotonically increasing `u64` offsets.
//! - One producer, any number of readers, each keeping its own bookmark.
//! - Readers that are caught up wait (async or blocking) until the next write.
//! - Readers whose bookmark was evicted are told they fell behind instead of silently skipping.
//! - A [`Sequencer`] turns a best-effort numbered source into contiguous writes, rebasing the
//!   window whenever the upstream ids jump.
//!
//! # Quick start
//! ```
//! use ph_eventbuf::{EventBuffer, Filter, Item, ReadError};
//!
//! let buffer = EventBuffer::new(4, 0);
//! let producer = buffer.producer();
//!
//! for id in 0..6 {
//!     producer.write(Item::new(id, id * 100)).unwrap();
//! }
//!
//! let batch = buffer.try_read(3, &Filter::All).unwrap();
//! assert_eq!(batch.next, 6);
//! assert_eq!(batch.ids(), vec![3, 4, 5]);
//!
//! let err = buffer.try_read(0, &Filter::All).unwrap_err();
//! assert_eq!(err, ReadError::FellBehind { requested: 0, start: 2 });
//! ```
//!
//! # Semantics
//! - The window is the half-open range `[start, end)`; `end - start` never exceeds the capacity.
//! - A write lands at `end`; once the window is full it evicts the item at `start`.
//! - A reset moves both `start` and `end` to a new offset, discarding everything buffered.
//! - Reads return the next offset to read from, which is the unfiltered end of the window, so
//!   filters never make a reader re-read or skip offsets.
//! - Every write and reset wakes all waiting readers; each re-checks the window independently.
//!
//! # Concurrency
//! The crate is single-producer by design. [`EventBuffer::producer`] may be called more than once,
//! but concurrent writers break the id/offset correspondence the [`Sequencer`] maintains.

pub mod config;
pub mod consumer;
pub mod error;
pub mod event_buffer;
pub mod item;
pub mod sequencer;
pub mod source;
mod stats;

pub use config::Config;
pub use consumer::Consumer;
pub use error::{ConfigError, ReadError, SequencerError, WriteError};
pub use event_buffer::{Batch, Bounds, EventBuffer, Producer};
pub use item::{Filter, Item};
pub use sequencer::{Accepted, Sequencer, SequencerStats, SyncState};
pub use source::{ChannelSource, Delivery, ItemSource};
pub use stats::BufferStats;
