//! Fixed-capacity pool of equal-sized byte regions, lent out as [`Blob`]
//! handles for variable-length payloads that need to flow through a
//! channel (which can only carry fixed-size `T: Copy` values).

use std::alloc::{self, Layout};

use thiserror::Error;

use crate::channel::{Channel, SpscChannel};

/// `take_slot` failed because every slot is currently on loan.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabError {
    #[error("no free slab slot available")]
    NoFreeSlot,
}

/// A pool of `num_slots` equal-sized (`max_blob_size`) regions, backed by
/// one contiguous allocation, plus an SPSC free-index queue seeded with
/// every slot at construction.
///
/// The free queue is itself single-producer/single-consumer: only one
/// block may call `take_slot` and only one may call the release path that
/// `Blob::release` drives. Concurrent unrelated producers/consumers need
/// either a different pool or external synchronization.
pub struct Slab {
    base: *mut u8,
    layout: Layout,
    max_blob_size: usize,
    num_slots: usize,
    free: Channel<u32>,
}

impl Slab {
    /// Allocates `num_slots * max_blob_size` bytes and fills the free
    /// queue with every slot index.
    ///
    /// # Panics
    /// If `num_slots` or `max_blob_size` is zero, if their product
    /// overflows `usize`, or if the underlying allocation fails.
    pub fn new(num_slots: usize, max_blob_size: usize) -> Self {
        assert!(num_slots > 0, "Slab::new: num_slots must be nonzero");
        assert!(max_blob_size > 0, "Slab::new: max_blob_size must be nonzero");
        let total = num_slots.checked_mul(max_blob_size).expect("Slab::new: num_slots * max_blob_size overflows");
        let layout = Layout::array::<u8>(total).expect("Slab::new: invalid layout");
        let base = unsafe { alloc::alloc_zeroed(layout) };
        assert!(!base.is_null(), "Slab::new: allocation failed");

        let free = Channel::new(num_slots);
        for idx in 0..num_slots as u32 {
            let pushed = free.try_push(idx);
            debug_assert!(pushed, "free queue must hold every slot index at construction");
        }

        Slab { base, layout, max_blob_size, num_slots, free }
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn max_blob_size(&self) -> usize {
        self.max_blob_size
    }

    /// Borrows one free slot. Transient failure, not terminal: a busy slab
    /// recovers as soon as a live `Blob` is released.
    pub fn take_slot(&self) -> Result<Blob, SlabError> {
        let idx = self.free.try_pop().ok_or(SlabError::NoFreeSlot)?;
        let ptr = unsafe { self.base.add(idx as usize * self.max_blob_size) };
        Ok(Blob { handle: BlobHandle { ptr, len: self.max_blob_size, slot_idx: idx, slab: self as *const Slab } })
    }

    fn release_slot(&self, idx: u32) {
        let pushed = self.free.try_push(idx);
        debug_assert!(pushed, "slab free queue overflowed: released a slot index twice or that was never taken");
    }
}

unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Drop for Slab {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base, self.layout) };
    }
}

/// The plain, `Copy` representation of a borrowed slot: what actually
/// flows through a channel. Carries no ownership of its own; see [`Blob`].
#[derive(Clone, Copy, Debug)]
pub struct BlobHandle {
    ptr: *mut u8,
    len: usize,
    slot_idx: u32,
    slab: *const Slab,
}

// The pointed-to bytes are exclusively owned by whichever block currently
// holds the `Blob` this handle came from or will become; sending the
// handle across a channel is exactly how that exclusive ownership moves
// between blocks.
unsafe impl Send for BlobHandle {}

/// A borrowed variable-length byte region with an explicit release
/// obligation. Must be released (via [`release`][Blob::release]) or handed
/// off (via [`into_handle`][Blob::into_handle]) exactly once; consuming
/// `self` in both makes a second call a compile error rather than a
/// runtime one.
pub struct Blob {
    handle: BlobHandle,
}

impl Blob {
    pub fn len(&self) -> usize {
        self.handle.len
    }

    pub fn is_empty(&self) -> bool {
        self.handle.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.handle.ptr, self.handle.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.handle.ptr, self.handle.len) }
    }

    /// Surrenders this blob's release obligation to whoever ends up with
    /// the handle, e.g. across a `push`/`pop` on a `Channel<BlobHandle>`.
    pub fn into_handle(self) -> BlobHandle {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }

    /// Reclaims ownership of a handle received from a channel.
    ///
    /// # Safety
    /// `handle` must be the product of exactly one [`Blob::into_handle`]
    /// call whose `Blob` has not otherwise been released, and must not be
    /// reconstructed more than once.
    pub unsafe fn from_handle(handle: BlobHandle) -> Blob {
        Blob { handle }
    }

    /// Returns this blob's slot to its slab's free queue.
    pub fn release(self) {
        let handle = self.handle;
        std::mem::forget(self);
        unsafe { &*handle.slab }.release_slot(handle.slot_idx);
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        // Reaching here means neither `release` nor `into_handle` ran;
        // the owning block forgot to close out the loan. That's a bug:
        // panic loudly in debug so it's caught in testing; in release,
        // release the slot anyway so the slab doesn't leak it forever.
        if cfg!(debug_assertions) {
            panic!("Blob for slab slot {} dropped without release() or into_handle()", self.handle.slot_idx);
        }
        unsafe { &*self.handle.slab }.release_slot(self.handle.slot_idx);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn take_slot_never_hands_out_the_same_index_twice() {
        let slab = Slab::new(4, 16);
        let a = slab.take_slot().unwrap();
        let b = slab.take_slot().unwrap();
        assert_ne!(a.handle.slot_idx, b.handle.slot_idx);
        a.release();
        b.release();
    }

    #[test]
    fn exhausting_every_slot_then_taking_one_more_is_transient() {
        let slab = Slab::new(2, 8);
        let a = slab.take_slot().unwrap();
        let b = slab.take_slot().unwrap();
        assert_eq!(slab.take_slot().unwrap_err(), SlabError::NoFreeSlot);
        a.release();
        assert!(slab.take_slot().is_ok());
        b.release();
    }

    #[test]
    fn release_returns_the_slot_to_the_free_queue() {
        let slab = Slab::new(1, 8);
        let blob = slab.take_slot().unwrap();
        assert!(slab.take_slot().is_err());
        blob.release();
        assert!(slab.take_slot().is_ok());
    }

    #[test]
    fn blob_writes_are_visible_through_the_same_slot() {
        let slab = Slab::new(1, 4);
        let mut blob = slab.take_slot().unwrap();
        blob.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(blob.as_slice(), &[1, 2, 3, 4]);
        blob.release();
    }

    #[test]
    fn into_handle_and_from_handle_round_trip_without_releasing() {
        let slab = Slab::new(1, 4);
        let blob = slab.take_slot().unwrap();
        let handle = blob.into_handle();
        assert!(slab.take_slot().is_err(), "slot must still be on loan after into_handle");
        let blob = unsafe { Blob::from_handle(handle) };
        blob.release();
        assert!(slab.take_slot().is_ok());
    }

    #[test]
    #[should_panic]
    fn dropping_a_blob_without_releasing_panics_in_debug() {
        let slab = Slab::new(1, 4);
        let blob = slab.take_slot().unwrap();
        drop(blob);
    }
}
