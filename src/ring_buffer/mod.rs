//! Lock-free, wait-free bounded SPSC ring buffer.
//!
//! Exactly one producer thread may call [`RingBuffer::try_push`]; exactly one
//! consumer thread may call [`RingBuffer::try_pop`] / [`RingBuffer::try_peek`].
//! `size`, `empty`, `full`, `stats` may be called from either side and return
//! a snapshot; `clear` requires the caller to guarantee no concurrent
//! push/pop is in flight.
//!
//! Four counters sit on their own cache lines (64-byte alignment) to
//! eliminate false sharing, following the padded-sequence pattern used by
//! the disruptor-style ring buffer this crate's producer/consumer model is
//! descended from.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, TelemetryError};

/// A `usize` counter padded to a 64-byte cache line, preventing false
/// sharing between the producer-owned and consumer-owned counters.
#[repr(align(64))]
struct PaddedCounter(AtomicUsize);

impl PaddedCounter {
    fn new(v: usize) -> Self {
        Self(AtomicUsize::new(v))
    }
}

/// Snapshot of ring buffer operation counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingBufferStats {
    pub push_ok: usize,
    pub push_fail: usize,
    pub pop_ok: usize,
    pub pop_fail: usize,
}

/// A bounded, single-producer single-consumer queue of `T`.
///
/// Capacity is rounded up to the next power of two `>= 1`; zero capacity
/// fails construction. The producer and consumer each keep a cached view of
/// the other side's counter to avoid an atomic load on every operation's
/// fast path.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    capacity: usize,

    head: PaddedCounter,        // next write index, producer-owned
    tail: PaddedCounter,        // next read index, consumer-owned
    cached_tail: PaddedCounter, // producer's last-seen tail
    cached_head: PaddedCounter, // consumer's last-seen head

    push_ok: AtomicUsize,
    push_fail: AtomicUsize,
    pop_ok: AtomicUsize,
    pop_fail: AtomicUsize,
}

// SAFETY: access to `slots` is gated by the head/tail protocol below, which
// guarantees a slot is only ever touched by one of the producer or the
// consumer at a time.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer. `requested_capacity` is rounded up to the
    /// next power of two; `0` is rejected.
    pub fn new(requested_capacity: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(TelemetryError::config("ring buffer capacity must be non-zero"));
        }
        let capacity = requested_capacity.next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            capacity,
            head: PaddedCounter::new(0),
            tail: PaddedCounter::new(0),
            cached_tail: PaddedCounter::new(0),
            cached_head: PaddedCounter::new(0),
            push_ok: AtomicUsize::new(0),
            push_fail: AtomicUsize::new(0),
            pop_ok: AtomicUsize::new(0),
            pop_fail: AtomicUsize::new(0),
        })
    }

    /// Buffer capacity (always a power of two).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `capacity - 1`, the bitmask used for index wrapping.
    pub fn mask(&self) -> usize {
        self.mask
    }

    /// Producer-side: try to push one item. Returns `false` if the buffer is
    /// full (holds `capacity - 1` items; one slot is always kept empty to
    /// disambiguate full from empty).
    pub fn try_push(&self, value: T) -> bool {
        let head = self.head.0.load(Ordering::Relaxed);
        let next = (head + 1) & self.mask;

        let mut cached_tail = self.cached_tail.0.load(Ordering::Relaxed);
        if next == cached_tail {
            cached_tail = self.tail.0.load(Ordering::Acquire);
            self.cached_tail.0.store(cached_tail, Ordering::Relaxed);
            if next == cached_tail {
                self.push_fail.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        unsafe {
            (*self.slots[head].get()).write(value);
        }
        self.head.0.store(next, Ordering::Release);
        self.push_ok.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Consumer-side: try to pop one item in FIFO order.
    pub fn try_pop(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);

        let mut cached_head = self.cached_head.0.load(Ordering::Relaxed);
        if tail == cached_head {
            cached_head = self.head.0.load(Ordering::Acquire);
            self.cached_head.0.store(cached_head, Ordering::Relaxed);
            if tail == cached_head {
                self.pop_fail.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let value = unsafe { (*self.slots[tail].get()).as_ptr().read() };
        let next = (tail + 1) & self.mask;
        self.tail.0.store(next, Ordering::Release);
        self.pop_ok.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Consumer-side snapshot approximation of current occupancy.
    pub fn size(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        (head.wrapping_sub(tail)) & self.mask
    }

    /// Whether the buffer currently has no items (approximate under concurrency).
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the buffer currently holds `capacity - 1` items, i.e. is full.
    pub fn full(&self) -> bool {
        self.size() == self.capacity - 1
    }

    /// A snapshot of the operation counters.
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            push_ok: self.push_ok.load(Ordering::Relaxed),
            push_fail: self.push_fail.load(Ordering::Relaxed),
            pop_ok: self.pop_ok.load(Ordering::Relaxed),
            pop_fail: self.pop_fail.load(Ordering::Relaxed),
        }
    }

    /// Drop all live elements and reset every counter to zero.
    ///
    /// # Safety contract
    /// The caller must guarantee no concurrent `try_push`/`try_pop` is in
    /// flight; this is not enforced by the type system.
    pub fn clear(&self) {
        while self.try_pop().is_some() {}
        self.head.0.store(0, Ordering::Relaxed);
        self.tail.0.store(0, Ordering::Relaxed);
        self.cached_tail.0.store(0, Ordering::Relaxed);
        self.cached_head.0.store(0, Ordering::Relaxed);
        self.push_ok.store(0, Ordering::Relaxed);
        self.push_fail.store(0, Ordering::Relaxed);
        self.pop_ok.store(0, Ordering::Relaxed);
        self.pop_fail.store(0, Ordering::Relaxed);
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Return a copy of the front element without advancing `tail`.
    pub fn try_peek(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let value = unsafe { (*self.slots[tail].get()).assume_init_ref().clone() };
        Some(value)
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rounds_capacity_to_power_of_two() {
        let rb: RingBuffer<u32> = RingBuffer::new(5).unwrap();
        assert_eq!(rb.capacity(), 8);
        assert_eq!(rb.mask(), 7);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(RingBuffer::<u32>::new(0).is_err());
    }

    /// Scenario S1 from the testable properties: capacity 4, push [1,2,3],
    /// size == 3, full == true, push(4) fails, pop yields 1,2,3.
    #[test]
    fn scenario_s1_spsc_correctness() {
        let rb: RingBuffer<u32> = RingBuffer::new(4).unwrap();
        assert!(rb.try_push(1));
        assert!(rb.try_push(2));
        assert!(rb.try_push(3));
        assert_eq!(rb.size(), 3);
        assert!(rb.full());
        assert!(!rb.try_push(4));
        assert_eq!(rb.try_pop(), Some(1));
        assert_eq!(rb.try_pop(), Some(2));
        assert_eq!(rb.try_pop(), Some(3));
        assert_eq!(rb.try_pop(), None);
    }

    #[test]
    fn no_loss_under_non_full() {
        let rb: RingBuffer<u32> = RingBuffer::new(16).unwrap();
        for i in 0..10 {
            assert!(rb.try_push(i));
        }
        for i in 0..10 {
            assert_eq!(rb.try_pop(), Some(i));
        }
    }

    #[test]
    fn clear_resets_counters_and_drops_live_items() {
        let rb: RingBuffer<String> = RingBuffer::new(4).unwrap();
        rb.try_push("a".to_string());
        rb.try_push("b".to_string());
        rb.clear();
        assert_eq!(rb.size(), 0);
        let stats = rb.stats();
        assert_eq!(stats.push_ok, 0);
    }

    #[test]
    fn concurrent_producer_consumer_preserves_fifo_order() {
        let rb = std::sync::Arc::new(RingBuffer::<u64>::new(1024).unwrap());
        let producer = {
            let rb = rb.clone();
            thread::spawn(move || {
                let mut i = 0u64;
                while i < 100_000 {
                    if rb.try_push(i) {
                        i += 1;
                    }
                }
            })
        };
        let consumer = {
            let rb = rb.clone();
            thread::spawn(move || {
                let mut expected = 0u64;
                while expected < 100_000 {
                    if let Some(v) = rb.try_pop() {
                        assert_eq!(v, expected);
                        expected += 1;
                    }
                }
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
