//! Fixed-capacity lock-free single-producer/single-consumer ring buffer.
//!
//! Used as the ready queue: the thread that completes a node pushes the
//! handles of successors that became runnable, a worker pulls them.
//!
//! # Full vs. empty
//!
//! With `N` slots, two wrapping cursors are equal both when the buffer is
//! empty and when it is full. The disambiguator here is a lap bit folded
//! into each cursor: cursors count over `0..2N` and address slot
//! `cursor % N`.
//!
//! - same position, same lap: the consumer has caught up, buffer empty;
//! - same position, different lap: the producer has wrapped onto the
//!   consumer, buffer full.
//!
//! Each cursor (and therefore each lap bit) has exactly one writer, so an
//! observer can never combine a fresh cursor with a stale full/empty flag.
//!
//! # Memory ordering
//!
//! The producer writes the slot, then publishes its cursor with `Release`;
//! the consumer loads the producer cursor with `Acquire` before reading the
//! slot. Symmetrically the consumer publishes its cursor after reading, so
//! the producer never overwrites a slot that is still being read.
//!
//! Correct for exactly one producer thread and one consumer thread.
//! [`RingBuffer::split`] enforces that statically; the `unsafe` methods on
//! `&RingBuffer` leave it to the caller.

use std::ptr::NonNull;

use crossbeam_utils::CachePadded;

use crate::alloc::SharedResource;
use crate::error::ConfigError;
use crate::options::RingOptions;
use crate::ordering::{OBSERVE, OWNED, PUBLISH, RELAXED};
use crate::raw_vec::array_layout;
use crate::sync::AtomicU32;

/// Largest supported element count (cursors count to `2 * capacity`).
pub const MAX_CAPACITY: u32 = 1 << 30;

/// Bounded SPSC queue of `Copy` elements.
///
/// # Example
///
/// ```rust
/// use taskweave::ring::RingBuffer;
///
/// let mut ring: RingBuffer<u32> = RingBuffer::with_capacity(4).unwrap();
/// let (mut tx, mut rx) = ring.split();
///
/// assert!(tx.try_push(7));
/// assert_eq!(rx.try_pull(), Some(7));
/// assert_eq!(rx.try_pull(), None);
/// ```
pub struct RingBuffer<T> {
    producer: CachePadded<AtomicU32>,
    consumer: CachePadded<AtomicU32>,
    slots: NonNull<T>,
    capacity: u32,
    resource: SharedResource,
}

// SAFETY: Elements are moved between threads by value.
unsafe impl<T: Send> Send for RingBuffer<T> {}
// SAFETY: Slot access is partitioned between one producer and one
// consumer by the cursor protocol (and by `split` / the unsafe contracts).
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("producer", &self.producer.load(RELAXED))
            .field("consumer", &self.consumer.load(RELAXED))
            .finish_non_exhaustive()
    }
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Ring with `options.capacity()` default-initialized slots.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroRingCapacity`] or [`ConfigError::RingCapacityTooLarge`].
    pub fn new(options: &RingOptions) -> Result<Self, ConfigError> {
        options.validate()?;

        let capacity = options.capacity();
        let resource = SharedResource::clone(options.shared_resource());
        let slots = resource
            .allocate_or_abort(array_layout::<T>(capacity as usize))
            .cast::<T>();

        for i in 0..capacity as usize {
            // SAFETY: i < capacity; slots are written once before any use.
            unsafe { slots.add(i).write(T::default()) };
        }

        Ok(Self {
            producer: CachePadded::new(AtomicU32::new(0)),
            consumer: CachePadded::new(AtomicU32::new(0)),
            slots,
            capacity,
            resource,
        })
    }

    /// Ring with `capacity` slots from the system resource.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_capacity(capacity: u32) -> Result<Self, ConfigError> {
        Self::new(&RingOptions::new(capacity))
    }
}

impl<T: Copy> RingBuffer<T> {
    /// Producer and consumer endpoints.
    ///
    /// The borrow makes it impossible to obtain a second producer or
    /// consumer while these are alive.
    pub fn split(&mut self) -> (Producer<'_, T>, Consumer<'_, T>) {
        let ring: &Self = self;
        (Producer { ring }, Consumer { ring })
    }

    /// Append `elem` unless the buffer is full.
    ///
    /// Returns `false`, leaving the buffer untouched, when full.
    ///
    /// # Safety
    ///
    /// No other thread may call `try_push` on this ring concurrently.
    #[inline]
    pub unsafe fn try_push(&self, elem: T) -> bool {
        let p = self.producer.load(OWNED);
        let c = self.consumer.load(OBSERVE);

        if self.distance(p, c) == self.capacity {
            return false;
        }

        // SAFETY: Slot `p` is outside the consumer's window (distance < N)
        // and only this producer writes slots.
        unsafe { self.slot(p).write(elem) };
        self.producer.store(self.advance(p), PUBLISH);
        true
    }

    /// Remove the oldest element unless the buffer is empty.
    ///
    /// # Safety
    ///
    /// No other thread may call `try_pull` on this ring concurrently.
    #[inline]
    pub unsafe fn try_pull(&self) -> Option<T> {
        let c = self.consumer.load(OWNED);
        let p = self.producer.load(OBSERVE);

        if p == c {
            return None;
        }

        // SAFETY: Slot `c` was published by the producer's release store,
        // and the producer cannot reuse it until our cursor moves past it.
        let elem = unsafe { self.slot(c).read() };
        self.consumer.store(self.advance(c), PUBLISH);
        Some(elem)
    }

    /// Whether the buffer held no elements at the time of the snapshot.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        let (p, c) = self.snapshot();
        p == c
    }

    /// Whether the consumer has caught up with the producer (both cursors
    /// on the same lap at the same slot).
    #[must_use]
    #[inline]
    pub fn caught_up(&self) -> bool {
        self.is_empty()
    }

    /// Element count at the time of the snapshot, at most `capacity`.
    #[must_use]
    #[inline]
    pub fn len(&self) -> u32 {
        let (p, c) = self.snapshot();
        self.occupancy(p, c)
    }

    /// Slots remaining at the time of the snapshot.
    #[must_use]
    #[inline]
    pub fn free_space(&self) -> u32 {
        self.capacity.saturating_sub(self.len())
    }

    /// Fixed element count.
    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Drop all pending elements by moving the consumer onto the producer.
    ///
    /// `&mut self` rules out an in-flight push or pull.
    pub fn clear(&mut self) {
        let p = self.producer.load(OBSERVE);
        self.consumer.store(p, PUBLISH);
    }

    // ------------------------------------------------------------------------
    //  Cursor arithmetic (cursors live in 0..2N)
    // ------------------------------------------------------------------------

    #[inline]
    fn snapshot(&self) -> (u32, u32) {
        let c = self.consumer.load(OBSERVE);
        let p = self.producer.load(OBSERVE);
        (p, c)
    }

    #[inline]
    const fn advance(&self, cursor: u32) -> u32 {
        let next = cursor + 1;
        if next == self.capacity * 2 { 0 } else { next }
    }

    /// Elements between consumer `c` and producer `p`.
    #[inline]
    const fn distance(&self, p: u32, c: u32) -> u32 {
        if p >= c {
            p - c
        } else {
            p + self.capacity * 2 - c
        }
    }

    /// Element count for a cursor pair.
    ///
    /// The two cursors are loaded separately, so a reader racing both ends
    /// can pair a new producer with an old consumer (or the reverse) and see
    /// a distance up to `2N - 1`. Clamped to `capacity`.
    #[inline]
    const fn occupancy(&self, p: u32, c: u32) -> u32 {
        let d = self.distance(p, c);
        if d > self.capacity { self.capacity } else { d }
    }

    #[inline]
    fn slot(&self, cursor: u32) -> NonNull<T> {
        let idx = if cursor >= self.capacity {
            cursor - self.capacity
        } else {
            cursor
        };
        // SAFETY: idx < capacity.
        unsafe { self.slots.add(idx as usize) }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Elements are `Copy` (checked at construction), nothing to drop.
        // SAFETY: Allocated in `new` with this layout.
        unsafe {
            self.resource
                .release(self.slots.cast(), array_layout::<T>(self.capacity as usize));
        }
    }
}

/// Producing endpoint of a split [`RingBuffer`].
#[derive(Debug)]
pub struct Producer<'a, T> {
    ring: &'a RingBuffer<T>,
}

impl<T: Copy> Producer<'_, T> {
    /// Append `elem`; `false` when full.
    #[inline]
    pub fn try_push(&mut self, elem: T) -> bool {
        // SAFETY: The only producer for this ring while the borrow lasts.
        unsafe { self.ring.try_push(elem) }
    }

    /// Slots remaining (advisory).
    #[must_use]
    #[inline]
    pub fn free_space(&self) -> u32 {
        self.ring.free_space()
    }

    /// Fixed element count.
    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> u32 {
        self.ring.capacity()
    }
}

/// Consuming endpoint of a split [`RingBuffer`].
#[derive(Debug)]
pub struct Consumer<'a, T> {
    ring: &'a RingBuffer<T>,
}

impl<T: Copy> Consumer<'_, T> {
    /// Remove the oldest element; `None` when empty.
    #[inline]
    pub fn try_pull(&mut self) -> Option<T> {
        // SAFETY: The only consumer for this ring while the borrow lasts.
        unsafe { self.ring.try_pull() }
    }

    /// Whether the buffer is empty (advisory).
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Element count (advisory).
    #[must_use]
    #[inline]
    pub fn len(&self) -> u32 {
        self.ring.len()
    }
}


// ============================================================================
//  Tests
// ============================================================================

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alloc::{CountingResource, SystemResource};

    const RING_SIZE: u32 = 8;

    fn _assert_send_sync()
    where
        RingBuffer<u64>: Send + Sync,
        Producer<'static, u64>: Send,
        Consumer<'static, u64>: Send,
    {
    }

    #[test]
    fn test_new_ring_is_empty() {
        let ring: RingBuffer<i32> = RingBuffer::with_capacity(RING_SIZE).unwrap();
        assert!(ring.is_empty());
        assert!(ring.caught_up());
        assert_eq!(ring.capacity(), RING_SIZE);
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.free_space(), RING_SIZE);
    }

    #[test]
    fn test_fill_completely_then_refuse() {
        let mut ring: RingBuffer<u32> = RingBuffer::with_capacity(RING_SIZE).unwrap();
        {
            let (mut tx, _) = ring.split();

            for i in 0..RING_SIZE {
                assert!(tx.try_push(i), "push {i} should fit");
            }
            assert_eq!(tx.free_space(), 0);

            for i in 0..RING_SIZE * 2 + 3 {
                assert!(!tx.try_push(i));
            }
        }
        assert_eq!(ring.len(), RING_SIZE);
        assert!(!ring.is_empty());
    }

    #[test]
    fn test_pull_from_empty_fails() {
        let mut ring: RingBuffer<u32> = RingBuffer::with_capacity(RING_SIZE).unwrap();
        let (_tx, mut rx) = ring.split();
        for _ in 0..RING_SIZE * 3 {
            assert_eq!(rx.try_pull(), None);
        }
    }

    #[test]
    fn test_fifo_across_wraparound() {
        let mut ring: RingBuffer<u32> = RingBuffer::with_capacity(3).unwrap();
        let (mut tx, mut rx) = ring.split();

        let mut next_in = 0;
        let mut next_out = 0;
        for round in 0..20 {
            let burst = round % 4;
            for _ in 0..burst {
                if tx.try_push(next_in) {
                    next_in += 1;
                }
            }
            while let Some(v) = rx.try_pull() {
                assert_eq!(v, next_out);
                next_out += 1;
            }
            assert!(rx.is_empty());
        }
        assert_eq!(next_in, next_out);
    }

    #[test]
    fn test_full_then_drain_then_empty() {
        let mut ring: RingBuffer<u64> = RingBuffer::with_capacity(RING_SIZE).unwrap();
        {
            let (mut tx, mut rx) = ring.split();
            for i in 0..u64::from(RING_SIZE) {
                assert!(tx.try_push(i));
            }
            for i in 0..u64::from(RING_SIZE) {
                assert_eq!(rx.try_pull(), Some(i));
            }
            assert_eq!(rx.try_pull(), None);
        }
        assert!(ring.is_empty());
        assert_eq!(ring.free_space(), RING_SIZE);
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut ring: RingBuffer<i32> = RingBuffer::with_capacity(RING_SIZE).unwrap();
        {
            let (mut tx, _) = ring.split();
            tx.try_push(0);
            tx.try_push(0);
            tx.try_push(0);
        }
        assert!(!ring.is_empty());

        ring.clear();
        assert!(ring.is_empty());

        let (mut tx, mut rx) = ring.split();
        assert!(tx.try_push(5));
        assert_eq!(rx.try_pull(), Some(5));
    }

    #[test]
    fn test_capacity_one() {
        let mut ring: RingBuffer<u8> = RingBuffer::with_capacity(1).unwrap();
        let (mut tx, mut rx) = ring.split();
        for i in 0..10 {
            assert!(tx.try_push(i));
            assert!(!tx.try_push(i));
            assert_eq!(rx.try_pull(), Some(i));
            assert_eq!(rx.try_pull(), None);
        }
    }

    #[test]
    fn test_storage_comes_from_resource() {
        let res = Arc::new(CountingResource::new(SystemResource));
        let ring: RingBuffer<u64> =
            RingBuffer::new(&RingOptions::new(16).resource(res.clone())).unwrap();
        assert_eq!(res.stats().live_bytes, 16 * 8);
        drop(ring);
        assert_eq!(res.stats().live_bytes, 0);
    }

    #[test]
    fn test_torn_cursor_pair_never_exceeds_capacity() {
        let ring: RingBuffer<u32> = RingBuffer::with_capacity(4).unwrap();
        // Consumer read at 6, producer read later at 5 after both wrapped:
        // the raw distance is 7.
        assert_eq!(ring.distance(5, 6), 7);
        assert_eq!(ring.occupancy(5, 6), 4);
        for c in 0..8 {
            for p in 0..8 {
                assert!(ring.occupancy(p, c) <= ring.capacity());
            }
        }
    }

    #[test]
    fn test_observer_snapshots_stay_in_range() {
        const COUNT: u32 = 50_000;
        let ring: RingBuffer<u32> = RingBuffer::with_capacity(4).unwrap();
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                for v in 0..COUNT {
                    // SAFETY: Sole producer.
                    while !unsafe { ring.try_push(v) } {
                        std::thread::yield_now();
                    }
                }
            });
            s.spawn(|| {
                // Stops the observer even if an assertion below fails.
                struct Finish<'a>(&'a std::sync::atomic::AtomicBool);
                impl Drop for Finish<'_> {
                    fn drop(&mut self) {
                        self.0.store(true, std::sync::atomic::Ordering::Release);
                    }
                }
                let _finish = Finish(&done);

                let mut expected = 0;
                while expected < COUNT {
                    // SAFETY: Sole consumer.
                    match unsafe { ring.try_pull() } {
                        Some(v) => {
                            assert_eq!(v, expected);
                            expected += 1;
                        }
                        None => std::thread::yield_now(),
                    }
                }
            });

            while !done.load(std::sync::atomic::Ordering::Acquire) {
                let len = ring.len();
                let free = ring.free_space();
                assert!(len <= ring.capacity(), "len {len} over capacity");
                assert!(free <= ring.capacity(), "free_space {free} over capacity");
                std::thread::yield_now();
            }
        });
        assert!(ring.is_empty());
    }

    #[test]
    fn test_rejects_zero_capacity() {
        assert!(matches!(
            RingBuffer::<u32>::with_capacity(0),
            Err(ConfigError::ZeroRingCapacity)
        ));
    }
}
