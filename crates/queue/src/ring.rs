//! Bounded sequence-numbered ring
//!
//! Each slot carries a sequence number that tells producers and consumers
//! whose turn it is:
//!
//! ```text
//! seq == pos          slot is free for the producer claiming `pos`
//! seq == pos + 1      slot holds the value written at `pos`
//! seq == pos + cap    slot was consumed and is free for the next lap
//! ```
//!
//! Producers claim a position by advancing `tail` with a CAS, write the value
//! and publish it by bumping the slot sequence. Consumers do the same on
//! `head`. Neither side ever waits on the other's lock.
//!
//! On top of the ring itself this type tracks what the resizable
//! [`Queue`](crate::Queue) needs to retire it safely: a `draining` flag set
//! once a larger or smaller replacement has been published, and a count of
//! producers currently inside [`Ring::try_push`].

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::metrics::QueueMetrics;

/// Attempts at a consistent cursor snapshot in [`Ring::len`]
const LEN_SNAPSHOT_RETRIES: usize = 16;

/// Keeps hot cursors on separate cache lines
#[repr(align(64))]
pub(crate) struct CachePadded<T>(T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

pub(crate) struct Ring<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    tail: CachePadded<AtomicUsize>,
    head: CachePadded<AtomicUsize>,

    /// Set once a replacement ring is the write target
    draining: AtomicBool,
    /// Producers between their draining check and the end of their push
    writers: AtomicUsize,
    /// Signalled after every successful push
    pub(crate) not_empty: Notify,
}

// SAFETY: slot values are only touched by the single producer or consumer
// that won the CAS for that position, and hand-off is ordered through the
// slot's Release/Acquire sequence number.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Build a ring; `capacity` must already be validated as a power of two
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            slots,
            mask: capacity - 1,
            tail: CachePadded(AtomicUsize::new(0)),
            head: CachePadded(AtomicUsize::new(0)),
            draining: AtomicBool::new(false),
            writers: AtomicUsize::new(0),
            not_empty: Notify::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate number of stored items.
    ///
    /// `head` never passes `tail`. A `head` read between two equal `tail`
    /// reads is an exact snapshot; under constant churn it falls back to
    /// reading `head` before `tail`, which can overcount but never wraps.
    pub(crate) fn len(&self) -> usize {
        for _ in 0..LEN_SNAPSHOT_RETRIES {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if self.tail.load(Ordering::Acquire) == tail {
                return self.distance(head, tail);
            }
        }
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        self.distance(head, tail)
    }

    fn distance(&self, head: usize, tail: usize) -> usize {
        let diff = tail.wrapping_sub(head) as isize;
        (diff.max(0) as usize).min(self.capacity())
    }

    /// Claim a slot and store `value`, or hand it back if the ring is full
    pub(crate) fn try_push(&self, value: T, metrics: &QueueMetrics) -> Result<(), T> {
        metrics.push_attempts.inc();

        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS gives exclusive access to
                        // this slot until its sequence is published
                        unsafe { (*slot.value.get()).write(value) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);

                        metrics.push_success.inc();
                        self.not_empty.notify_one();
                        return Ok(());
                    }
                    Err(current) => {
                        metrics.push_cas_retries.inc();
                        pos = current;
                        std::hint::spin_loop();
                    }
                }
            } else if diff < 0 {
                // Consumer of the previous lap has not freed the slot yet
                return Err(value);
            } else {
                // Another producer claimed this position; catch up
                std::thread::yield_now();
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the oldest published value, if any
    pub(crate) fn try_pop(&self, metrics: &QueueMetrics) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the slot sequence proved the value was
                        // written, and winning the CAS makes this the only
                        // reader of it
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(pos.wrapping_add(self.mask).wrapping_add(1), Ordering::Release);

                        metrics.pop_success.inc();
                        return Some(value);
                    }
                    Err(current) => {
                        metrics.pop_cas_retries.inc();
                        pos = current;
                        std::hint::spin_loop();
                    }
                }
            } else if diff < 0 {
                // Empty, or the producer for `pos` has not published yet
                return None;
            } else {
                std::thread::yield_now();
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Register a producer. Returns `false` (already deregistered) when the
    /// ring is draining and the caller must reload the write target.
    pub(crate) fn enter_writer(&self) -> bool {
        self.writers.fetch_add(1, Ordering::SeqCst);
        if self.draining.load(Ordering::SeqCst) {
            self.exit_writer();
            return false;
        }
        true
    }

    /// Deregister a producer, waking consumers if it was the last one into
    /// a draining ring so they can re-check for completion
    pub(crate) fn exit_writer(&self) {
        let previous = self.writers.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.draining.load(Ordering::SeqCst) {
            self.not_empty.notify_waiters();
        }
    }

    pub(crate) fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.not_empty.notify_waiters();
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// No producer can still add to this ring and nothing is left in it
    pub(crate) fn is_drained(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
            && self.writers.load(Ordering::SeqCst) == 0
            && self.head.load(Ordering::SeqCst) == self.tail.load(Ordering::SeqCst)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        let mut pos = head;
        while pos != tail {
            let slot = &mut self.slots[pos & self.mask];
            if *slot.seq.get_mut() == pos.wrapping_add(1) {
                // SAFETY: published and never consumed
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
            pos = pos.wrapping_add(1);
        }
    }
}
