//! Bookmark-tracking reader over an [`EventBuffer`].

use core::future::Future;
use core::time::Duration;

use tracing::debug;

use crate::error::ReadError;
use crate::event_buffer::{Batch, EventBuffer};
use crate::item::Filter;

/// A reader that remembers where it stopped.
///
/// After every successful read the bookmark moves to the batch's `next` offset. When the
/// bookmark fell behind the window it jumps to the window start, the skipped offsets are
/// added to [`Consumer::dropped`], and the error is still returned so the caller can resync
/// from elsewhere if it needs to. Cancelled and too-far-ahead reads leave the bookmark alone.
pub struct Consumer<'a, P> {
    buffer: &'a EventBuffer<P>,
    bookmark: u64,
    filter: Filter,
    dropped_accum: u64,
}

impl<'a, P> Consumer<'a, P> {
    pub(crate) fn new(buffer: &'a EventBuffer<P>, bookmark: u64, filter: Filter) -> Self {
        Self {
            buffer,
            bookmark,
            filter,
            dropped_accum: 0,
        }
    }

    /// Offset the next read starts from.
    #[inline]
    pub fn bookmark(&self) -> u64 {
        self.bookmark
    }

    #[inline]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    /// How many offsets have been skipped because the consumer fell behind
    /// (since creation or the last reset).
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped_accum
    }

    /// Reset the internal drop counter.
    #[inline]
    pub fn reset_dropped(&mut self) {
        self.dropped_accum = 0;
    }

    /// Read whatever is pending without waiting.
    pub fn try_next(&mut self) -> Result<Batch<P>, ReadError> {
        let result = self.buffer.try_read(self.bookmark, &self.filter);
        self.advance(result)
    }

    /// Read pending items, waiting for new ones until `cancel` completes.
    pub async fn next<C>(&mut self, cancel: C) -> Result<Batch<P>, ReadError>
    where
        C: Future<Output = ()>,
    {
        let result = self.buffer.read(self.bookmark, &self.filter, cancel).await;
        self.advance(result)
    }

    pub async fn next_timeout(&mut self, timeout: Duration) -> Result<Batch<P>, ReadError> {
        let result = self
            .buffer
            .read_timeout(self.bookmark, &self.filter, timeout)
            .await;
        self.advance(result)
    }

    /// Blocking variant of [`Consumer::next`] for synchronous callers.
    pub fn next_blocking(&mut self, timeout: Option<Duration>) -> Result<Batch<P>, ReadError> {
        let result = self
            .buffer
            .read_blocking(self.bookmark, &self.filter, timeout);
        self.advance(result)
    }

    /// Fast-forward so the *next* read yields the newest item (i.e. skip backlog).
    /// On an empty window the consumer waits for the next write instead.
    pub fn skip_to_latest(&mut self) {
        let bounds = self.buffer.bounds();
        self.bookmark = if bounds.is_empty() {
            bounds.end
        } else {
            bounds.end - 1
        };
    }

    fn advance(&mut self, result: Result<Batch<P>, ReadError>) -> Result<Batch<P>, ReadError> {
        match &result {
            Ok(batch) => self.bookmark = batch.next,
            Err(err) if err.is_fell_behind() => {
                self.dropped_accum += err.missed();
                debug!(
                    from = self.bookmark,
                    to = err.resume_offset(),
                    missed = err.missed(),
                    "consumer bookmark moved past lost items"
                );
                self.bookmark = err.resume_offset();
            }
            Err(_) => {}
        }
        result
    }
}
