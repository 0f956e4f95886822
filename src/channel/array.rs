use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;

use super::cache_padded::CachePadded;
use super::loom_atomics::{AtomicUsize, Ordering};
use super::{ring, ReadWindow, SpscChannel, WriteWindow};

/// In-place, compile-time-capacity sibling of [`super::Channel`] for targets
/// that cannot allocate (bare-metal/RTOS blocks with statically-sized
/// channels as fields). Same ring-buffer contract; `N` must be a power of
/// two.
pub struct ArrayChannel<T, const N: usize> {
    storage: [UnsafeCell<MaybeUninit<T>>; N],
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    last_write_peek: Cell<usize>,
    last_read_peek: Cell<usize>,
}

impl<T: Copy, const N: usize> ArrayChannel<T, N> {
    /// # Panics
    /// If `N` is zero or not a power of two.
    pub fn new() -> Self {
        assert!(N > 0 && N.is_power_of_two(), "ArrayChannel capacity must be a non-zero power of two, got {N}");
        ArrayChannel {
            storage: [(); N].map(|_| UnsafeCell::new(MaybeUninit::uninit())),
            mask: N - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            last_write_peek: Cell::new(0),
            last_read_peek: Cell::new(0),
        }
    }
}

impl<T: Copy, const N: usize> Default for ArrayChannel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> SpscChannel<T> for ArrayChannel<T, N> {
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

unsafe impl<T: Send, const N: usize> Send for ArrayChannel<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for ArrayChannel<T, N> {}
