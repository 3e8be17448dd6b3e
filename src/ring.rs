//! A bounded, lock-free single-producer/single-consumer ring buffer
//! decoupling the book engine (producer) from the persistence writer
//! (consumer).
//!
//! `try_push`/`try_pop` never block. The blocking `push`/`pop` variants
//! park on a condition variable used purely as a wake signal (with a
//! small bounded timeout as a fallback, per the index-wait policy this
//! crate pins) rather than to guard the queue's data path, which stays
//! lock-free.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crossbeam::utils::CachePadded;

/// Default capacity, in slots, used when a caller doesn't override it
/// (see `server.ring_buffer_size` in [`crate::config::Config`]).
pub const DEFAULT_CAPACITY: usize = 65_536;

const WAIT_TIMEOUT: Duration = Duration::from_millis(1);

/// Errors constructing a [`RingBuffer`].
#[derive(Debug)]
#[non_exhaustive]
pub enum RingBufferError {
    /// Capacity was not a power of two, or was less than 2 (B1).
    InvalidCapacity { capacity: usize },
}

impl fmt::Display for RingBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingBufferError::InvalidCapacity { capacity } => {
                write!(
                    f,
                    "ring buffer capacity {capacity} must be a power of two and at least 2"
                )
            }
        }
    }
}

impl std::error::Error for RingBufferError {}

/// Bounded SPSC queue of `T`. One producer, one consumer, enforced only
/// by convention (the type itself is `Send + Sync` so it can live behind
/// a shared reference crossing the thread boundary).
pub struct RingBuffer<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: u64,
    capacity: usize,
    read: CachePadded<AtomicU64>,
    write: CachePadded<AtomicU64>,
    notify_lock: Mutex<()>,
    notify_cvar: Condvar,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring buffer of the given capacity.
    ///
    /// # Errors
    /// Returns [`RingBufferError::InvalidCapacity`] unless `capacity` is
    /// a power of two and at least 2 (B1: one slot is always reserved to
    /// distinguish full from empty).
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(RingBufferError::InvalidCapacity { capacity });
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        Ok(RingBuffer {
            buffer: slots.into_boxed_slice(),
            mask: (capacity - 1) as u64,
            capacity,
            read: CachePadded::new(AtomicU64::new(0)),
            write: CachePadded::new(AtomicU64::new(0)),
            notify_lock: Mutex::new(()),
            notify_cvar: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently queued. Racy with respect to a
    /// concurrent producer/consumer; for observability only.
    pub fn len(&self) -> usize {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Acquire);
        w.wrapping_sub(r) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.read.load(Ordering::Acquire) == self.write.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Acquire);
        (w.wrapping_add(1) & self.mask) == (r & self.mask)
    }

    /// Non-blocking push. Returns the item back on failure (buffer full).
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let w = self.write.load(Ordering::Relaxed);
        let next = w.wrapping_add(1);
        let r = self.read.load(Ordering::Acquire);
        if (next & self.mask) == (r & self.mask) {
            return Err(item);
        }
        let idx = (w & self.mask) as usize;
        unsafe {
            (*self.buffer[idx].get()).write(item);
        }
        self.write.store(next, Ordering::Release);
        self.notify_cvar.notify_all();
        Ok(())
    }

    /// Non-blocking pop. Returns `None` on failure (buffer empty).
    pub fn try_pop(&self) -> Option<T> {
        let r = self.read.load(Ordering::Relaxed);
        let w = self.write.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let idx = (r & self.mask) as usize;
        let item = unsafe { (*self.buffer[idx].get()).assume_init_read() };
        self.read.store(r.wrapping_add(1), Ordering::Release);
        self.notify_cvar.notify_all();
        Some(item)
    }

    /// Blocking push: parks the producer until space frees up.
    pub fn push(&self, mut item: T) {
        loop {
            match self.try_push(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    self.park();
                }
            }
        }
    }

    /// Blocking pop: parks the consumer until an item is available.
    pub fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.park();
        }
    }

    /// Blocking pop that also accepts a should-exit predicate. Re-checks
    /// the predicate immediately before parking and again after waking,
    /// so a shutdown signalled concurrently with the final pushes is
    /// never missed.
    pub fn pop_or_exit(&self, should_exit: impl Fn() -> bool) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if should_exit() {
                return self.try_pop();
            }
            self.park();
            if should_exit() {
                return self.try_pop();
            }
        }
    }

    fn park(&self) {
        let guard = self.notify_lock.lock().unwrap();
        let _ = self.notify_cvar.wait_timeout(guard, WAIT_TIMEOUT);
    }

    /// Wake every parked producer/consumer. Required on shutdown so a
    /// `pop_or_exit` loop parked on an empty buffer doesn't wait out the
    /// full timeout before observing the exit signal.
    pub fn notify_all(&self) {
        self.notify_cvar.notify_all();
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}
