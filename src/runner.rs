//! Binds a block to the output channels it feeds in a specific graph.

use std::ops::Deref;

use crate::block::Block;
use crate::error::StepResult;

/// A non-owning, `'static` reference to a channel living inside some other
/// block.
///
/// Holds a raw pointer rather than `&'a C` so [`Runner`] (and the worker
/// closure a scheduler spawns for it) can be `'static`. The channel is
/// pinned for the graph's lifetime the same way the block is, see the
/// [`Block`] docs.
pub struct OutputRef<C> {
    ptr: *const C,
}

impl<C> OutputRef<C> {
    /// # Safety
    /// `channel` must outlive every [`Runner`] built with this `OutputRef`,
    /// i.e. it must live at least as long as the graph.
    pub fn new(channel: &C) -> Self {
        OutputRef { ptr: channel as *const C }
    }
}

impl<C> Deref for OutputRef<C> {
    type Target = C;

    fn deref(&self) -> &C {
        unsafe { &*self.ptr }
    }
}

impl<C> Clone for OutputRef<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for OutputRef<C> {}

// Safe under the same pinned-for-the-graph's-lifetime contract as `Runner`'s
// `Send` impl below; `C: Sync` because the pointee is read from whichever
// worker owns the `Runner` that holds this `OutputRef`, not necessarily the
// thread that created it.
unsafe impl<C: Sync> Send for OutputRef<C> {}

/// A compile-time binding of one [`Block`] to the output channels it writes
/// in this graph. Does not own the block or the outputs; both must outlive
/// the runner, which in practice means outliving the
/// [`FlowGraph`][crate::flowgraph::FlowGraph] built from it.
///
/// Built from a `&mut B` rather than owning `B` because the same block
/// value the runner points at is also where the block's *input* channels
/// live; some other part of the graph holds the actual allocation (a `Box`,
/// an arena slot) that keeps the block pinned.
pub struct Runner<B: Block> {
    block: *mut B,
    outputs: B::Outputs,
}

impl<B: Block> Runner<B> {
    /// # Safety
    /// `block` must remain valid and must not be aliased mutably anywhere
    /// else for as long as the returned `Runner` is stepped.
    pub fn new(block: &mut B, outputs: B::Outputs) -> Self {
        Runner { block: block as *mut B, outputs }
    }

    pub fn name(&self) -> &str {
        unsafe { &*self.block }.name()
    }

    pub fn step(&mut self) -> StepResult {
        let block = unsafe { &mut *self.block };
        block.procedure(&self.outputs)
    }
}

// Safe because a `Runner` is only ever driven by the single worker the
// scheduler assigned it, and the block it points to is pinned for the
// graph's lifetime; see `Block` and `FlowGraph` docs for the full contract.
unsafe impl<B: Block> Send for Runner<B> where B::Outputs: Send {}

/// Object-safe façade over [`Runner<B>`] so a [`FlowGraph`][crate::flowgraph::FlowGraph]
/// can hold a fixed-size array of runners whose block types differ, a
/// heterogeneous list bound once at graph construction.
pub trait RunnerHandle: Send + 'static {
    fn name(&self) -> &str;
    fn step(&mut self) -> StepResult;
}

impl<B: Block + 'static> RunnerHandle for Runner<B>
where
    B::Outputs: Send,
{
    fn name(&self) -> &str {
        Runner::name(self)
    }

    fn step(&mut self) -> StepResult {
        Runner::step(self)
    }
}
