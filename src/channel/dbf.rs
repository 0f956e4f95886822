//! Doubly-mapped variant of the SPSC channel.
//!
//! The backing storage is mapped twice, back to back, into virtually
//! contiguous address space (on Unix, via `memfd_create` + a pair of
//! `MAP_FIXED` mappings of the same file). A window of up to `capacity`
//! elements starting anywhere in the ring is therefore always one
//! contiguous span. `peek_write`/`peek_read` never hand back a second,
//! wrapped-around span the way [`super::Channel`] does. Targets with no
//! virtual-memory support fall back to a plain boxed ring with the same
//! two-span windowing as [`super::Channel`].

use std::cell::Cell;
use std::mem::MaybeUninit;

use super::cache_padded::CachePadded;
use super::loom_atomics::{AtomicUsize, Ordering};
use super::{ring, ReadWindow, SpscChannel, WriteWindow};

#[cfg(unix)]
pub use unix_impl::DoublyMappedChannel;

#[cfg(not(unix))]
pub use fallback::DoublyMappedChannel;

/// Nominal minimum byte-size for a doubly-mapped channel's backing storage:
/// one platform virtual-memory page, since the mirror trick only works on
/// whole pages. The constructor queries the real page size at runtime
/// (`sys::page_size`) and rounds a requested capacity up to a multiple of
/// it; this constant is the typical value a caller sizing a channel ahead
/// of construction can assume.
pub const DOUBLY_MAPPED_MIN_SIZE: usize = 4096;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use crate::sys;
    use std::ffi::CStr;
    use std::marker::PhantomData;

    /// Heap-backed doubly-mapped ring. Capacity is rounded up to a power of
    /// two whose byte length is also a multiple of the platform page size,
    /// since the mirror trick only works on whole pages.
    pub struct DoublyMappedChannel<T> {
        base: *mut T,
        raw_base: *mut u8,
        mapped_bytes: usize,
        mask: usize,
        head: CachePadded<AtomicUsize>,
        tail: CachePadded<AtomicUsize>,
        last_write_peek: Cell<usize>,
        last_read_peek: Cell<usize>,
        _marker: PhantomData<T>,
    }

    fn round_capacity<T>(requested: usize) -> usize {
        let elem_size = std::mem::size_of::<T>().max(1);
        let page = sys::page_size();
        let mut capacity = requested.max(1).next_power_of_two();
        while (capacity * elem_size) % page != 0 {
            capacity *= 2;
        }
        capacity
    }

    impl<T: Copy> DoublyMappedChannel<T> {
        /// Allocates a channel with at least `requested` slots, mirror-mapped
        /// twice in the address space.
        ///
        /// # Errors
        /// Returns the underlying `memfd_create`/`mmap` error if the OS
        /// declines to grant the mapping.
        pub fn new(requested: usize) -> std::io::Result<Self> {
            let capacity = round_capacity::<T>(requested);
            let region_bytes = capacity * std::mem::size_of::<T>().max(1);

            let name = CStr::from_bytes_with_nul(b"dataflow-rt-dbf\0").unwrap();
            let file = sys::mmap::memfd_create(name, 0)?;
            sys::mmap::ftruncate(&file, region_bytes as i64)?;

            let reserved = sys::mmap::mmap_reserve(region_bytes * 2)?;
            let result = (|| unsafe {
                sys::mmap::mmap_file(
                    reserved,
                    region_bytes,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_FIXED,
                    &file,
                    0,
                )?;
                sys::mmap::mmap_file(
                    reserved.add(region_bytes),
                    region_bytes,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_FIXED,
                    &file,
                    0,
                )?;
                Ok(())
            })();
            if let Err(e) = result {
                unsafe { sys::mmap::munmap(reserved, region_bytes * 2).ok() };
                return Err(e);
            }

            Ok(DoublyMappedChannel {
                base: reserved as *mut T,
                raw_base: reserved,
                mapped_bytes: region_bytes * 2,
                mask: capacity - 1,
                head: CachePadded::new(AtomicUsize::new(0)),
                tail: CachePadded::new(AtomicUsize::new(0)),
                last_write_peek: Cell::new(0),
                last_read_peek: Cell::new(0),
                _marker: PhantomData,
            })
        }

        /// Allocates with [`super::super::DEFAULT_BUFFER_SIZE`] slots.
        pub fn with_default_capacity() -> std::io::Result<Self> {
            Self::new(super::super::DEFAULT_BUFFER_SIZE)
        }

        #[inline]
        unsafe fn slot(&self, pos: usize) -> *mut T {
            self.base.add(pos & self.mask)
        }

        /// A single contiguous readable span of `size()` elements, valid
        /// until the consumer's next `commit_read`. The mirror mapping
        /// means [`SpscChannel::peek_read`] already returns one span here;
        /// this is that same span as a raw pointer, for callers (FFT,
        /// resampler codecs) that want `(ptr, len)` instead of a slice pair.
        pub fn read_dbf(&self) -> (*const T, usize) {
            let window = self.peek_read();
            debug_assert!(window.second.is_empty());
            (window.first.as_ptr(), window.first.len())
        }

        /// A single contiguous writable span of `space()` elements, valid
        /// until the producer's next `commit_write`.
        pub fn write_dbf(&self) -> (*mut T, usize) {
            let window = self.peek_write();
            debug_assert!(window.second.is_empty());
            (window.first.as_ptr() as *mut T, window.first.len())
        }
    }

    impl<T: Copy> SpscChannel<T> for DoublyMappedChannel<T> {
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
            unsafe { self.slot(tail).write(v) };
            self.tail.store(tail.wrapping_add(1), Ordering::Release);
        }

        fn pop(&self) -> T {
            let head = self.head.load(Ordering::Relaxed);
            let v = unsafe { self.slot(head).read() };
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
            let n = data.len().min(space);
            if n > 0 {
                unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.slot(tail), n) };
                self.tail.store(tail.wrapping_add(n), Ordering::Release);
            }
            n
        }

        fn read_n(&self, dst: &mut [T]) -> usize {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            let size = ring::size(tail, head);
            let n = dst.len().min(size);
            if n > 0 {
                unsafe { std::ptr::copy_nonoverlapping(self.slot(head), dst.as_mut_ptr(), n) };
                self.head.store(head.wrapping_add(n), Ordering::Release);
            }
            n
        }

        fn peek_write(&self) -> WriteWindow<'_, T> {
            let tail = self.tail.load(Ordering::Relaxed);
            let head = self.head.load(Ordering::Acquire);
            let avail = ring::space(self.capacity(), tail, head);
            let ptr = unsafe { self.slot(tail) as *mut MaybeUninit<T> };
            let first = unsafe { std::slice::from_raw_parts_mut(ptr, avail) };
            self.last_write_peek.set(avail);
            WriteWindow { first, second: &mut [] }
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
            let ptr = unsafe { self.slot(head) as *const T };
            let first = unsafe { std::slice::from_raw_parts(ptr, avail) };
            self.last_read_peek.set(avail);
            ReadWindow { first, second: &[] }
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

    impl<T> Drop for DoublyMappedChannel<T> {
        fn drop(&mut self) {
            unsafe {
                let _ = sys::mmap::munmap(self.raw_base, self.mapped_bytes);
            }
        }
    }

    unsafe impl<T: Send> Send for DoublyMappedChannel<T> {}
    unsafe impl<T: Send> Sync for DoublyMappedChannel<T> {}
}

#[cfg(not(unix))]
mod fallback {
    use super::*;
    use std::cell::UnsafeCell;

    /// Non-Unix fallback: a plain boxed ring with the same two-span
    /// windowing as [`super::super::Channel`]. Constructed infallibly to
    /// mirror the Unix variant's `Result`-returning constructor as closely
    /// as the two can agree; callers that only target hosted Unix rarely
    /// see this path at all.
    ///
    /// [`read_dbf`][DoublyMappedChannel::read_dbf] and
    /// [`write_dbf`][DoublyMappedChannel::write_dbf] still hand back one
    /// contiguous span here, by copying through a `capacity`-sized scratch
    /// buffer instead of mirroring pages. That preserves the API at the
    /// cost of the zero-copy property this channel exists to give on Unix.
    pub struct DoublyMappedChannel<T> {
        storage: Box<[UnsafeCell<MaybeUninit<T>>]>,
        mask: usize,
        head: CachePadded<AtomicUsize>,
        tail: CachePadded<AtomicUsize>,
        last_write_peek: Cell<usize>,
        last_read_peek: Cell<usize>,
        dbf_scratch: UnsafeCell<Box<[MaybeUninit<T>]>>,
        dbf_write_pending: Cell<bool>,
    }

    impl<T: Copy> DoublyMappedChannel<T> {
        pub fn new(requested: usize) -> std::io::Result<Self> {
            let capacity = ring::capacity_for(requested);
            let mut storage = Vec::with_capacity(capacity);
            storage.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
            let mut scratch = Vec::with_capacity(capacity);
            scratch.resize_with(capacity, MaybeUninit::uninit);
            Ok(DoublyMappedChannel {
                storage: storage.into_boxed_slice(),
                mask: capacity - 1,
                head: CachePadded::new(AtomicUsize::new(0)),
                tail: CachePadded::new(AtomicUsize::new(0)),
                last_write_peek: Cell::new(0),
                last_read_peek: Cell::new(0),
                dbf_scratch: UnsafeCell::new(scratch.into_boxed_slice()),
                dbf_write_pending: Cell::new(false),
            })
        }

        pub fn with_default_capacity() -> std::io::Result<Self> {
            Self::new(super::super::DEFAULT_BUFFER_SIZE)
        }

        /// A single contiguous readable span of `size()` elements, copied
        /// out of the (possibly wrapped) ring into the scratch buffer.
        /// Valid until the next `read_dbf`/`commit_read` call; not
        /// zero-copy, see the struct docs.
        pub fn read_dbf(&self) -> (*const T, usize) {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            let avail = ring::size(tail, head);
            self.last_read_peek.set(avail);
            let scratch = unsafe { &mut *self.dbf_scratch.get() };
            let dst = unsafe { std::slice::from_raw_parts_mut(scratch.as_mut_ptr() as *mut T, avail) };
            unsafe { ring::read_n(&self.storage, self.mask, head, avail, dst) };
            (scratch.as_ptr() as *const T, avail)
        }

        /// A single contiguous writable span of `space()` elements, backed
        /// by the scratch buffer. The caller fills it, then calls
        /// `commit_write(n)` as usual; `commit_write` copies the first `n`
        /// scratch elements into the (possibly wrapped) ring before
        /// advancing. Not zero-copy, see the struct docs.
        pub fn write_dbf(&self) -> (*mut T, usize) {
            let tail = self.tail.load(Ordering::Relaxed);
            let head = self.head.load(Ordering::Acquire);
            let avail = ring::space(self.capacity(), tail, head);
            self.last_write_peek.set(avail);
            self.dbf_write_pending.set(true);
            let scratch = unsafe { &mut *self.dbf_scratch.get() };
            (scratch.as_mut_ptr() as *mut T, avail)
        }
    }

    impl<T: Copy> SpscChannel<T> for DoublyMappedChannel<T> {
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
            if self.dbf_write_pending.replace(false) {
                let scratch = unsafe { &*self.dbf_scratch.get() };
                let data = unsafe { std::slice::from_raw_parts(scratch.as_ptr() as *const T, n) };
                unsafe { ring::write_n(&self.storage, self.mask, tail, n, data) };
            }
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

    unsafe impl<T: Send> Send for DoublyMappedChannel<T> {}
    unsafe impl<T: Send> Sync for DoublyMappedChannel<T> {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_dbf_span_matches_equivalent_pops() {
        let ch = DoublyMappedChannel::<u32>::new(4).unwrap();
        ch.write_n(&[1, 2, 3, 4]);
        let (ptr, n) = ch.read_dbf();
        let got = unsafe { std::slice::from_raw_parts(ptr, n) };
        assert_eq!(got, &[1, 2, 3, 4]);
        ch.commit_read(n);
        assert_eq!(ch.size(), 0);
    }

    #[test]
    fn write_dbf_then_commit_is_visible_to_pops() {
        let ch = DoublyMappedChannel::<u32>::new(4).unwrap();
        let (ptr, n) = ch.write_dbf();
        assert!(n >= 4);
        unsafe {
            for i in 0..4u32 {
                ptr.add(i as usize).write(i * 10);
            }
        }
        ch.commit_write(4);
        let mut out = [0u32; 4];
        assert_eq!(ch.read_n(&mut out), 4);
        assert_eq!(out, [0, 10, 20, 30]);
    }

    #[test]
    fn read_dbf_span_is_contiguous_across_a_wraparound_point() {
        let ch = DoublyMappedChannel::<u32>::new(4).unwrap();
        // Push past the backing length so the next write/read window
        // straddles the physical wraparound point.
        for _ in 0..3 {
            ch.push(0);
            ch.pop();
        }
        ch.write_n(&[7, 8, 9]);
        let (ptr, n) = ch.read_dbf();
        assert_eq!(n, 3);
        let got = unsafe { std::slice::from_raw_parts(ptr, n) };
        assert_eq!(got, &[7, 8, 9]);
        ch.commit_read(n);
    }

    #[test]
    fn size_plus_space_equals_capacity() {
        let ch = DoublyMappedChannel::<u32>::new(8).unwrap();
        for i in 0..5u32 {
            ch.push(i);
        }
        assert_eq!(ch.size() + ch.space(), ch.capacity());
        ch.pop();
        assert_eq!(ch.size() + ch.space(), ch.capacity());
    }
}
