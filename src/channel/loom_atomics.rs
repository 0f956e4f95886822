//! Swaps in `loom`'s atomics for the channel's head/tail indices when built
//! under a loom model (`RUSTFLAGS="--cfg loom" cargo test --test
//! loom_channel`), so that harness explores every interleaving of the SPSC
//! protocol instead of whatever single schedule the OS happened to pick.
//! Every other build uses the real `std::sync::atomic` types.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicUsize, Ordering};
#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicUsize, Ordering};
