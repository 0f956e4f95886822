use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;

use super::cache_padded::CachePadded;
use super::loom_atomics::{AtomicUsize, Ordering};
use super::{ring, ReadWindow, SpscChannel, WriteWindow};

/// Heap-backed bounded SPSC ring buffer, capacity chosen at construction.
///
/// `head` and `tail` are monotonically increasing counters, not the raw
/// storage index; the index is `counter & mask`. The producer owns `tail`
/// (publishes it with `Release` after writing), the consumer owns `head`
/// (publishes it with `Release` after reading); each side `Acquire`-loads
/// the other's counter to see how much room it has. No locks, no spinning
/// inside the channel; see [`crate::channel`] module docs for the
/// single-writer/single-reader contract this relies on.
pub struct Channel<T> {
    storage: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    // Length of the window handed out by the last peek_write/peek_read,
    // used only to validate the matching commit. Single-writer per side, so
    // a plain Cell suffices.
    last_write_peek: Cell<usize>,
    last_read_peek: Cell<usize>,
}

impl<T: Copy> Channel<T> {
    /// Allocates a channel with at least `requested` slots, rounded up to
    /// the next power of two (minimum 1).
    pub fn new(requested: usize) -> Self {
        let capacity = ring::capacity_for(requested);
        let mut storage = Vec::with_capacity(capacity);
        storage.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        Channel {
            storage: storage.into_boxed_slice(),
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            last_write_peek: Cell::new(0),
            last_read_peek: Cell::new(0),
        }
    }

    /// Allocates a channel with [`super::DEFAULT_BUFFER_SIZE`] slots.
    pub fn with_default_capacity() -> Self {
        Self::new(super::DEFAULT_BUFFER_SIZE)
    }
}

impl<T: Copy> SpscChannel<T> for Channel<T> {
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn size(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        ring::size(tail, head)
    }

    fn space(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        ring::space(self.capacity(), tail, head)
    }

    fn push(&self, v: T) {
        let tail = self.tail.load(Ordering::Relaxed);
        unsafe { ring::write_one(&self.storage, self.mask, tail, v) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
    }

    fn pop(&self) -> T {
        let head = self.head.load(Ordering::Relaxed);
        let v = unsafe { ring::read_one(&self.storage, self.mask, head) };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        v
    }

    fn try_push(&self, v: T) -> bool {
        if self.space() == 0 {
            return false;
        }
        self.push(v);
        true
    }

    fn try_pop(&self) -> Option<T> {
        if self.size() == 0 {
            return None;
        }
        Some(self.pop())
    }

    fn write_n(&self, data: &[T]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let space = ring::space(self.capacity(), tail, head);
        let n = unsafe { ring::write_n(&self.storage, self.mask, tail, space, data) };
        if n > 0 {
            self.tail.store(tail.wrapping_add(n), Ordering::Release);
        }
        n
    }

    fn read_n(&self, dst: &mut [T]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let size = ring::size(tail, head);
        let n = unsafe { ring::read_n(&self.storage, self.mask, head, size, dst) };
        if n > 0 {
            self.head.store(head.wrapping_add(n), Ordering::Release);
        }
        n
    }

    fn peek_write(&self) -> WriteWindow<'_, T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let avail = ring::space(self.capacity(), tail, head);
        let (first, second) = unsafe { ring::write_spans(&self.storage, self.mask, tail, avail) };
        self.last_write_peek.set(first.len() + second.len());
        WriteWindow { first, second }
    }

    fn commit_write(&self, n: usize) {
        assert!(
            n <= self.last_write_peek.get(),
            "commit_write({n}) exceeds the last peek_write window ({})",
            self.last_write_peek.get()
        );
        let tail = self.tail.load(Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(n), Ordering::Release);
        self.last_write_peek.set(0);
    }

    fn peek_read(&self) -> ReadWindow<'_, T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let avail = ring::size(tail, head);
        let (first, second) = unsafe { ring::read_spans(&self.storage, self.mask, head, avail) };
        self.last_read_peek.set(first.len() + second.len());
        ReadWindow { first, second }
    }

    fn commit_read(&self, n: usize) {
        assert!(
            n <= self.last_read_peek.get(),
            "commit_read({n}) exceeds the last peek_read window ({})",
            self.last_read_peek.get()
        );
        let head = self.head.load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(n), Ordering::Release);
        self.last_read_peek.set(0);
    }
}

// The producer thread and the consumer thread each touch disjoint fields
// (tail vs. head) except for the Acquire loads of the other side's index,
// which is exactly what the ordering above establishes as safe to share.
unsafe impl<T: Send> Send for Channel<T> {}
unsafe impl<T: Send> Sync for Channel<T> {}
