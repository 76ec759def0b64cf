//! Bounded byte queues connecting the transport tasks to the control path.
//!
//! The producer must never block, so when the queue is full the oldest unread byte is dropped to make room and the
//! loss is tallied. Every access happens inside a short critical section, which also keeps the control path (running
//! at interrupt priority) from observing a half-finished push.

use core::cell::RefCell;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use heapless::Deque;

/// A queue of up to `N` unread bytes.
///
/// ```
/// use polycv_lib::queue::ByteQueue;
///
/// let queue = ByteQueue::<8>::new();
/// let (mut producer, mut consumer) = queue.split();
/// producer.push(0x90);
/// assert_eq!(Some(0x90), consumer.pop());
/// assert_eq!(None, consumer.pop());
/// ```
pub struct ByteQueue<const N: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<N>>>,
}

struct Inner<const N: usize> {
    bytes: Deque<u8, N>,
    /// Bytes lost to overflow.
    overflows: u32,
}

impl<const N: usize> Inner<N> {
    fn push(&mut self, byte: u8) {
        if self.bytes.is_full() {
            self.bytes.pop_front();
            self.overflows = self.overflows.saturating_add(1);
        }
        // room was just made
        let _ = self.bytes.push_back(byte);
    }
}

impl<const N: usize> Default for ByteQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteQueue<N> {
    /// Constructs an empty queue. Usable in a `static`.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                bytes: Deque::new(),
                overflows: 0,
            })),
        }
    }

    /// Splits the queue into its two ends.
    ///
    /// Taking `&self` lets the queue live in a `static` shared by a transport task and the control path; it is up to
    /// the caller to hand out exactly one of each end.
    pub fn split(&self) -> (Producer<'_, N>, Consumer<'_, N>) {
        (Producer { queue: self }, Consumer { queue: self })
    }

    /// Number of bytes lost to overflow so far.
    pub fn overflows(&self) -> u32 {
        self.with(|inner| inner.overflows)
    }

    /// Maximum number of unread bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<N>) -> R) -> R {
        self.inner.lock(|inner| f(&mut inner.borrow_mut()))
    }
}

/// Something the control path can pull input bytes from.
pub trait ByteSource {
    /// Removes and returns the next byte, if any.
    fn pop(&mut self) -> Option<u8>;
}

/// The writing end of a [`ByteQueue`].
pub struct Producer<'a, const N: usize> {
    queue: &'a ByteQueue<N>,
}

impl<const N: usize> Producer<'_, N> {
    /// Appends a byte, dropping the oldest unread byte if the queue is full. Never blocks.
    pub fn push(&mut self, byte: u8) {
        self.queue.with(|inner| inner.push(byte));
    }

    /// Appends every byte of a slice as one unit; the consumer sees all of it or none of it.
    pub fn push_slice(&mut self, bytes: &[u8]) {
        self.queue.with(|inner| bytes.iter().for_each(|&byte| inner.push(byte)));
    }
}

/// The reading end of a [`ByteQueue`].
pub struct Consumer<'a, const N: usize> {
    queue: &'a ByteQueue<N>,
}

impl<const N: usize> Consumer<'_, N> {
    /// Removes and returns the oldest byte still queued, if any.
    pub fn pop(&mut self) -> Option<u8> {
        self.queue.with(|inner| inner.bytes.pop_front())
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.queue.with(|inner| inner.bytes.len())
    }

    /// Returns `true` if there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes lost to overflow so far.
    pub fn overflows(&self) -> u32 {
        self.queue.overflows()
    }
}

impl<const N: usize> ByteSource for Consumer<'_, N> {
    fn pop(&mut self) -> Option<u8> {
        Consumer::pop(self)
    }
}
