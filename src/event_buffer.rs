//! Bounded event window indexed by monotonically increasing virtual offsets.
//!
//! # Overview
//! - Single producer, any number of readers.
//! - The producer never waits; once the window holds `capacity` items each write evicts the oldest.
//! - Offsets are `u64` and never decrease, except through an explicit [`Producer::reset`].
//! - Readers pass their own bookmark. A read either returns the items from the bookmark up to the
//!   end of the window, waits for the next write, or reports that the bookmark fell behind.
//!
//! # Locking
//! The window (slots plus `start`/`end`) lives behind a single mutex. Writers mutate under the lock
//! and broadcast to every waiting reader after releasing it. Synchronous readers wait on a condition
//! variable tied to the same mutex; async readers register with a [`Notify`] *before* inspecting the
//! window, so a write landing between the check and the wait still wakes them. Every woken reader
//! re-evaluates the window on its own, since a reset may have moved it arbitrarily far.
//!
//! # Notes
//! - Items are stored as `Arc<Item<P>>`; reads hand out clones of the `Arc`, never copies of `P`.
//! - A reset does not clear slots. Stale slots sit outside `[start, end)` and are overwritten later.

use core::fmt;
use core::future::Future;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::config::Config;
use crate::consumer::Consumer;
use crate::error::{ConfigError, ReadError, WriteError};
use crate::item::{Filter, Item};
use crate::stats::{BufferStats, Counters};

/// The half-open range `[start, end)` of offsets currently retained.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub start: u64,
    pub end: u64,
}

impl Bounds {
    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Result of a successful read: the items found and the offset to read from next.
///
/// `next` always marks the unfiltered end of what was consumed, so a bookmark set to it stays
/// correct even when the filter discarded every item.
#[must_use]
#[derive(Clone, Debug)]
pub struct Batch<P> {
    pub next: u64,
    pub items: Vec<Arc<Item<P>>>,
}

impl<P> Batch<P> {
    fn empty(next: u64) -> Self {
        Self {
            next,
            items: Vec::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of the returned items, in order.
    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.id).collect()
    }
}

enum Step<P> {
    Done(Result<Batch<P>, ReadError>),
    Wait,
}

struct Window<P> {
    slots: Box<[Option<Arc<Item<P>>>]>,
    start: u64,
    end: u64,
    /// Bumped on every write and reset so waiting readers can tell a real wake-up.
    generation: u64,
}

impl<P> Window<P> {
    fn new(capacity: usize, start: u64) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            start,
            end: start,
            generation: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    #[inline]
    fn idx_for(&self, offset: u64) -> usize {
        (offset % self.capacity()) as usize
    }

    #[inline]
    fn bounds(&self) -> Bounds {
        Bounds {
            start: self.start,
            end: self.end,
        }
    }

    fn push(&mut self, item: Arc<Item<P>>) -> Result<u64, WriteError> {
        let offset = self.end;
        if offset == u64::MAX {
            return Err(WriteError::OffsetExhausted { end: offset });
        }
        let idx = self.idx_for(offset);
        self.slots[idx] = Some(item);
        if self.end - self.start == self.capacity() {
            self.start += 1;
        }
        self.end += 1;
        self.generation = self.generation.wrapping_add(1);
        Ok(offset)
    }

    fn rebase(&mut self, start: u64) {
        self.start = start;
        self.end = start;
        self.generation = self.generation.wrapping_add(1);
    }

    fn get(&self, offset: u64) -> Option<&Arc<Item<P>>> {
        if !self.bounds().contains(offset) {
            return None;
        }
        self.slots[self.idx_for(offset)].as_ref()
    }

    fn collect(&self, from: u64, filter: &Filter) -> Batch<P> {
        let items = (from..self.end)
            .filter_map(|offset| self.get(offset))
            .filter(|item| filter.matches::<P>(item))
            .cloned()
            .collect();
        Batch {
            next: self.end,
            items,
        }
    }

    /// Decides a read without waiting. `Wait` means the reader is caught up.
    fn evaluate(&self, requested: u64, filter: &Filter) -> Step<P> {
        if requested < self.start {
            Step::Done(Err(ReadError::FellBehind {
                requested,
                start: self.start,
            }))
        } else if requested < self.end {
            Step::Done(Ok(self.collect(requested, filter)))
        } else if requested == self.end {
            Step::Wait
        } else {
            Step::Done(Err(ReadError::TooFarAhead {
                requested,
                end: self.end,
            }))
        }
    }

    /// Decides a read that will not wait again; a caught-up reader gets an empty batch.
    fn settle(&self, requested: u64, filter: &Filter) -> Result<Batch<P>, ReadError> {
        match self.evaluate(requested, filter) {
            Step::Done(result) => result,
            Step::Wait => Ok(Batch::empty(requested)),
        }
    }
}

/// Fixed-capacity event window shared by one producer and many readers.
///
/// Share it between tasks with an `Arc`; every operation takes `&self`.
pub struct EventBuffer<P> {
    window: Mutex<Window<P>>,
    readers: Condvar,
    notify: Notify,
    counters: Counters,
}

impl<P> EventBuffer<P> {
    /// Creates a buffer holding up to `capacity` items whose first write lands at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, start: u64) -> Self {
        assert!(capacity > 0, "capacity must be greater than zero");
        Self {
            window: Mutex::new(Window::new(capacity, start)),
            readers: Condvar::new(),
            notify: Notify::new(),
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.capacity, config.start_offset))
    }

    /// Create the producer handle. Only one producer may be active.
    #[inline]
    pub fn producer(&self) -> Producer<'_, P> {
        Producer { buffer: self }
    }

    /// Create a reader that tracks its own bookmark, starting at `bookmark`.
    #[inline]
    pub fn consumer(&self, bookmark: u64, filter: Filter) -> Consumer<'_, P> {
        Consumer::new(self, bookmark, filter)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.window.lock().slots.len()
    }

    #[inline]
    pub fn bounds(&self) -> Bounds {
        self.window.lock().bounds()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bounds().len() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bounds().is_empty()
    }

    /// The most recently written item, if the window holds any.
    pub fn latest(&self) -> Option<Arc<Item<P>>> {
        let window = self.window.lock();
        window.end.checked_sub(1).and_then(|offset| window.get(offset).cloned())
    }

    pub fn stats(&self) -> BufferStats {
        self.counters.snapshot()
    }

    /// Reads without ever waiting.
    ///
    /// A caught-up reader (`requested == end`) gets an empty batch whose `next` is `requested`.
    pub fn try_read(&self, requested: u64, filter: &Filter) -> Result<Batch<P>, ReadError> {
        let result = self.window.lock().settle(requested, filter);
        self.observe(result)
    }

    /// Reads from `requested`, waiting for the next write or reset if the reader is caught up.
    ///
    /// The wait ends early with [`ReadError::Cancelled`] once `cancel` completes. `cancel` is only
    /// polled while waiting; a read that can be answered immediately never observes it.
    pub async fn read<C>(
        &self,
        requested: u64,
        filter: &Filter,
        cancel: C,
    ) -> Result<Batch<P>, ReadError>
    where
        C: Future<Output = ()>,
    {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Step::Done(result) = self.evaluate(requested, filter) {
            return self.observe(result);
        }

        tokio::select! {
            biased;
            _ = cancel => {
                debug!(requested, "read cancelled while waiting");
                return Err(ReadError::Cancelled { requested });
            }
            _ = notified.as_mut() => {}
        }

        let result = self.window.lock().settle(requested, filter);
        self.observe(result)
    }

    /// [`EventBuffer::read`] cancelled after `timeout`.
    pub async fn read_timeout(
        &self,
        requested: u64,
        filter: &Filter,
        timeout: Duration,
    ) -> Result<Batch<P>, ReadError> {
        self.read(requested, filter, tokio::time::sleep(timeout)).await
    }

    /// Blocking read for synchronous callers.
    ///
    /// Waits on the window's condition variable until a write or reset happens. With a `timeout`,
    /// an expired wait returns [`ReadError::Cancelled`]; with `None` the call may block forever.
    pub fn read_blocking(
        &self,
        requested: u64,
        filter: &Filter,
        timeout: Option<Duration>,
    ) -> Result<Batch<P>, ReadError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut window = self.window.lock();
        if let Step::Done(result) = window.evaluate(requested, filter) {
            drop(window);
            return self.observe(result);
        }

        let generation = window.generation;
        while window.generation == generation {
            match deadline {
                Some(deadline) => {
                    let timed_out = self.readers.wait_until(&mut window, deadline).timed_out();
                    if timed_out && window.generation == generation {
                        drop(window);
                        debug!(requested, "blocking read timed out");
                        return Err(ReadError::Cancelled { requested });
                    }
                }
                None => self.readers.wait(&mut window),
            }
        }

        let result = window.settle(requested, filter);
        drop(window);
        self.observe(result)
    }

    fn write(&self, item: Item<P>) -> Result<u64, WriteError> {
        let item = Arc::new(item);
        let (offset, bounds) = {
            let mut window = self.window.lock();
            let offset = window.push(item)?;
            (offset, window.bounds())
        };
        self.counters.record_write();
        trace!(offset, start = bounds.start, end = bounds.end, "item written");
        self.wake_readers();
        Ok(offset)
    }

    fn reset(&self, start: u64) {
        let previous = {
            let mut window = self.window.lock();
            let previous = window.bounds();
            window.rebase(start);
            previous
        };
        self.counters.record_reset();
        debug!(
            start,
            previous_start = previous.start,
            previous_end = previous.end,
            "buffer reset"
        );
        self.wake_readers();
    }

    #[inline]
    fn wake_readers(&self) {
        self.readers.notify_all();
        self.notify.notify_waiters();
    }

    #[inline]
    fn evaluate(&self, requested: u64, filter: &Filter) -> Step<P> {
        self.window.lock().evaluate(requested, filter)
    }

    fn observe(&self, result: Result<Batch<P>, ReadError>) -> Result<Batch<P>, ReadError> {
        if let Err(err) = &result
            && let ReadError::FellBehind { requested, start } = *err
        {
            self.counters.record_fell_behind();
            debug!(requested, start, missed = err.missed(), "reader fell behind");
        }
        result
    }
}

impl<P> fmt::Debug for EventBuffer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let window = self.window.lock();
        f.debug_struct("EventBuffer")
            .field("capacity", &window.slots.len())
            .field("start", &window.start)
            .field("end", &window.end)
            .finish()
    }
}

/// Write side of an [`EventBuffer`].
pub struct Producer<'a, P> {
    buffer: &'a EventBuffer<P>,
}

impl<'a, P> Producer<'a, P> {
    /// Append `item` at the end of the window and wake all waiting readers.
    /// Returns the offset the item was stored at.
    ///
    /// Fails without touching the window if it already ends at `u64::MAX`, the one offset
    /// that can never hold an item.
    #[inline]
    pub fn write(&self, item: Item<P>) -> Result<u64, WriteError> {
        self.buffer.write(item)
    }

    /// Discard every buffered item and restart the window at `start`.
    ///
    /// Readers waiting or arriving later with an offset below `start` get
    /// [`ReadError::FellBehind`].
    #[inline]
    pub fn reset(&self, start: u64) {
        self.buffer.reset(start)
    }

    #[inline]
    pub fn buffer(&self) -> &'a EventBuffer<P> {
        self.buffer
    }
}

impl<P> fmt::Debug for Producer<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("buffer", self.buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Bounds, EventBuffer};
    use crate::error::{ReadError, WriteError};
    use crate::item::{Filter, Item};
    use std::future::pending;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn filled(capacity: usize, ids: core::ops::Range<u64>) -> EventBuffer<u64> {
        let buffer = EventBuffer::new(capacity, ids.start);
        let producer = buffer.producer();
        for id in ids {
            producer.write(Item::new(id, id * 10)).unwrap();
        }
        buffer
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than zero")]
    fn zero_capacity_panics() {
        EventBuffer::<u32>::new(0, 0);
    }

    #[test]
    fn write_returns_offset_and_grows_window() {
        let buffer = EventBuffer::new(4, 7);
        let producer = buffer.producer();

        assert!(buffer.is_empty());
        assert_eq!(producer.write(Item::new(7, ())), Ok(7));
        assert_eq!(producer.write(Item::new(8, ())), Ok(8));
        assert_eq!(buffer.bounds(), Bounds { start: 7, end: 9 });
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let buffer = EventBuffer::new(3, 0);
        let producer = buffer.producer();
        for id in 0..20 {
            producer.write(Item::new(id, ())).unwrap();
            let bounds = buffer.bounds();
            assert!(bounds.start <= bounds.end);
            assert!(bounds.len() <= 3);
        }
        assert_eq!(buffer.bounds(), Bounds { start: 17, end: 20 });
    }

    #[test]
    fn evicts_oldest_first() {
        let buffer = filled(4, 0..4);
        buffer.producer().write(Item::new(4, 40)).unwrap();

        assert_eq!(buffer.bounds(), Bounds { start: 1, end: 5 });
        let batch = buffer.try_read(1, &Filter::All).unwrap();
        assert_eq!(batch.ids(), vec![1, 2, 3, 4]);
        assert_eq!(
            buffer.try_read(0, &Filter::All).unwrap_err(),
            ReadError::FellBehind {
                requested: 0,
                start: 1
            }
        );
    }

    #[test]
    fn try_read_returns_tail_of_window() {
        let buffer = filled(8, 0..5);
        let batch = buffer.try_read(2, &Filter::All).unwrap();
        assert_eq!(batch.next, 5);
        assert_eq!(batch.ids(), vec![2, 3, 4]);
        assert_eq!(batch.items[0].payload, 20);
    }

    #[test]
    fn try_read_when_caught_up_is_empty() {
        let buffer = filled(8, 0..5);
        let batch = buffer.try_read(5, &Filter::All).unwrap();
        assert_eq!(batch.next, 5);
        assert!(batch.is_empty());
    }

    #[test]
    fn try_read_past_end_is_too_far_ahead() {
        let buffer = filled(8, 0..5);
        assert_eq!(
            buffer.try_read(6, &Filter::All).unwrap_err(),
            ReadError::TooFarAhead {
                requested: 6,
                end: 5
            }
        );
    }

    #[test]
    fn filter_restricts_items_not_offsets() {
        let buffer = EventBuffer::new(8, 0);
        let producer = buffer.producer();
        producer.write(Item::keyed(0, "a", ())).unwrap();
        producer.write(Item::keyed(1, "b", ())).unwrap();
        producer.write(Item::keyed(2, "a", ())).unwrap();
        producer.write(Item::new(3, ())).unwrap();

        let batch = buffer.try_read(0, &Filter::key("a")).unwrap();
        assert_eq!(batch.next, 4);
        assert_eq!(batch.ids(), vec![0, 2]);

        let none = buffer.try_read(3, &Filter::key("b")).unwrap();
        assert_eq!(none.next, 4);
        assert!(none.is_empty());
    }

    #[test]
    fn reset_discards_window() {
        let buffer = filled(8, 0..5);
        buffer.producer().reset(42);

        assert_eq!(buffer.bounds(), Bounds { start: 42, end: 42 });
        assert!(buffer.latest().is_none());
        assert!(buffer.try_read(3, &Filter::All).unwrap_err().is_fell_behind());
        assert_eq!(buffer.try_read(41, &Filter::All).unwrap_err().resume_offset(), 42);

        let batch = buffer.try_read(42, &Filter::All).unwrap();
        assert_eq!(batch.next, 42);
        assert!(batch.is_empty());
    }

    #[test]
    fn write_at_last_offset_is_refused() {
        let buffer = EventBuffer::new(4, 0);
        let producer = buffer.producer();
        producer.reset(u64::MAX - 1);
        assert_eq!(producer.write(Item::new(u64::MAX - 1, ())), Ok(u64::MAX - 1));

        assert_eq!(
            producer.write(Item::new(u64::MAX, ())),
            Err(WriteError::OffsetExhausted { end: u64::MAX })
        );
        assert_eq!(
            buffer.bounds(),
            Bounds {
                start: u64::MAX - 1,
                end: u64::MAX
            }
        );
        assert_eq!(buffer.stats().writes, 1);
    }

    #[test]
    fn latest_reads_newest() {
        let buffer = filled(2, 0..5);
        let latest = buffer.latest().unwrap();
        assert_eq!(latest.id, 4);
        assert_eq!(latest.payload, 40);
    }

    #[test]
    fn stats_count_writes_resets_and_fell_behind() {
        let buffer = filled(2, 0..5);
        buffer.producer().reset(10);
        let _ = buffer.try_read(0, &Filter::All);
        let _ = buffer.try_read(10, &Filter::All);

        let stats = buffer.stats();
        assert_eq!(stats.writes, 5);
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.fell_behind, 1);
    }

    #[tokio::test]
    async fn read_returns_immediately_when_items_pending() {
        let buffer = filled(4, 0..3);
        let batch = buffer.read(1, &Filter::All, pending()).await.unwrap();
        assert_eq!(batch.next, 3);
        assert_eq!(batch.ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn read_behind_window_never_waits() {
        let buffer = filled(2, 0..6);
        let err = buffer.read(1, &Filter::All, pending()).await.unwrap_err();
        assert_eq!(
            err,
            ReadError::FellBehind {
                requested: 1,
                start: 4
            }
        );
    }

    #[tokio::test]
    async fn blocked_read_wakes_on_write() {
        let buffer = Arc::new(EventBuffer::<u64>::new(4, 0));
        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.read(0, &Filter::All, pending()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.producer().write(Item::new(0, 7)).unwrap();

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.next, 1);
        assert_eq!(batch.ids(), vec![0]);
        assert_eq!(batch.items[0].payload, 7);
    }

    #[tokio::test]
    async fn cancelled_read_keeps_requested_offset() {
        let buffer = filled(4, 0..2);
        let err = buffer
            .read_timeout(2, &Filter::All, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, ReadError::Cancelled { requested: 2 });
        assert_eq!(err.resume_offset(), 2);
    }

    #[tokio::test]
    async fn reset_past_waiting_reader_reports_fell_behind() {
        let buffer = Arc::new(filled(4, 0..3));
        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.read(3, &Filter::All, pending()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.producer().reset(9);

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            ReadError::FellBehind {
                requested: 3,
                start: 9
            }
        );
    }

    #[tokio::test]
    async fn reset_below_waiting_reader_reports_too_far_ahead() {
        let buffer = Arc::new(filled(4, 0..3));
        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.read(3, &Filter::All, pending()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.producer().reset(1);

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            ReadError::TooFarAhead {
                requested: 3,
                end: 1
            }
        );
    }

    #[tokio::test]
    async fn reset_to_waiting_offset_wakes_with_empty_batch() {
        let buffer = Arc::new(filled(4, 0..3));
        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.read(3, &Filter::All, pending()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.producer().reset(3);

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.next, 3);
        assert!(batch.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_write_wakes_every_waiting_reader() {
        let buffer = Arc::new(filled(8, 0..2));
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move { buffer.read(2, &Filter::All, pending()).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        buffer.producer().write(Item::new(2, 20)).unwrap();

        for reader in readers {
            let batch = reader.await.unwrap().unwrap();
            assert_eq!(batch.next, 3);
            assert_eq!(batch.ids(), vec![2]);
        }
    }

    #[test]
    fn blocking_read_wakes_on_write() {
        let buffer = EventBuffer::<u64>::new(4, 0);
        thread::scope(|scope| {
            let reader = scope.spawn(|| buffer.read_blocking(0, &Filter::All, None));
            thread::sleep(Duration::from_millis(20));
            buffer.producer().write(Item::new(0, 1)).unwrap();

            let batch = reader.join().unwrap().unwrap();
            assert_eq!(batch.next, 1);
            assert_eq!(batch.ids(), vec![0]);
        });
    }

    #[test]
    fn blocking_read_times_out_as_cancelled() {
        let buffer = filled(4, 0..1);
        let err = buffer
            .read_blocking(1, &Filter::All, Some(Duration::from_millis(10)))
            .unwrap_err();
        assert_eq!(err, ReadError::Cancelled { requested: 1 });
    }

    #[test]
    fn blocking_read_sees_reset() {
        let buffer = filled(4, 0..2);
        thread::scope(|scope| {
            let reader = scope.spawn(|| {
                buffer.read_blocking(2, &Filter::All, Some(Duration::from_secs(5)))
            });
            thread::sleep(Duration::from_millis(20));
            buffer.producer().reset(5);

            let err = reader.join().unwrap().unwrap_err();
            assert_eq!(err.resume_offset(), 5);
        });
    }
}
