use std::ops::Deref;

/// Pads `T` out to a cache line so that the producer's and the consumer's
/// index live on separate lines and never false-share.
///
/// x86-64 and AArch64 both use 64-byte lines. Fixed constant, not a
/// per-platform query.
#[repr(align(64))]
pub(crate) struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        CachePadded(value)
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}
