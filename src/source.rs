//! Upstream item sources feeding the [`Sequencer`](crate::Sequencer).
//!
//! The [`ItemSource`] trait abstracts whatever delivers numbered items (a database
//! notification channel, a message queue, ...) so the sequencing logic can run against real
//! transports and in-memory channels alike.
//!
//! ## Implementations
//!
//! - [`ChannelSource`]: items pushed through a `tokio::sync::mpsc` channel (in this module)

use core::convert::Infallible;
use core::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::item::Item;

/// What a single poll of an [`ItemSource`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<P> {
    Item(Item<P>),
    /// Nothing arrived within the source's idle interval.
    Idle,
    /// The source is exhausted; no further items will arrive.
    Closed,
}

/// Delivers items with unique, ideally contiguous ids.
///
/// Ordering is best effort; the sequencer reconciles gaps. Errors returned from
/// [`ItemSource::next_item`] are fatal to the sequencer loop.
#[async_trait]
pub trait ItemSource<P>: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wait for the next item, at most for the source's idle interval.
    async fn next_item(&mut self) -> Result<Delivery<P>, Self::Error>;

    /// Check that the underlying connection is still alive.
    ///
    /// Called after an idle interval. A failed probe is reported but does not stop
    /// the sequencer and does not count as a gap.
    async fn probe(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// In-memory source backed by an mpsc channel.
///
/// Reports [`Delivery::Idle`] when no item arrives within `idle_interval`, and
/// [`Delivery::Closed`] once every sender has been dropped and the channel drained.
#[derive(Debug)]
pub struct ChannelSource<P> {
    rx: mpsc::Receiver<Item<P>>,
    idle_interval: Duration,
}

impl<P> ChannelSource<P> {
    pub fn new(rx: mpsc::Receiver<Item<P>>, idle_interval: Duration) -> Self {
        Self { rx, idle_interval }
    }

    /// Create a bounded channel and the source reading from it.
    pub fn channel(capacity: usize, idle_interval: Duration) -> (mpsc::Sender<Item<P>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx, idle_interval))
    }

    #[inline]
    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }
}

#[async_trait]
impl<P: Send> ItemSource<P> for ChannelSource<P> {
    type Error = Infallible;

    async fn next_item(&mut self) -> Result<Delivery<P>, Self::Error> {
        match tokio::time::timeout(self.idle_interval, self.rx.recv()).await {
            Ok(Some(item)) => Ok(Delivery::Item(item)),
            Ok(None) => Ok(Delivery::Closed),
            Err(_) => Ok(Delivery::Idle),
        }
    }
}
