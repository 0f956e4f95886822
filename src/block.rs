//! The per-step callable every node in a graph implements.

use crate::error::StepResult;

/// A long-lived unit of computation. A block owns its input channels as
/// named fields; its output channels live in *other* blocks and are bound
/// by a [`crate::runner::Runner`] at graph-construction time, not owned
/// here.
///
/// Blocks are meant to be pinned: once a [`Runner`][crate::runner::Runner]
/// has captured a raw pointer to one, it must not move again for the
/// lifetime of the graph. Put blocks in a `Box`, a `Vec` reserved up front,
/// or any other allocation that won't relocate them, and keep that
/// allocation alive at least as long as the [`FlowGraph`][crate::flowgraph::FlowGraph]
/// that references them.
pub trait Block: Send {
    /// The output-channel references this block's [`procedure`][Block::procedure]
    /// writes to, fixed for the block's type. `()` for a sink with no
    /// outputs, `&'a SomeChannel` for one output, a tuple of references for
    /// several.
    type Outputs;

    /// A human-readable, stable name, fixed at construction. Surfaces in
    /// [`BlockExecutionStats`][crate::scheduler::BlockExecutionStats] and
    /// diagnostic logging.
    fn name(&self) -> &str;

    /// Does one unit of work: read what's available on owned input
    /// channels, write what fits to `outputs`, return `Ok(())` if any
    /// progress was made.
    ///
    /// Must not block waiting for input or output space; return
    /// [`ErrorKind::NotEnoughSamples`][crate::error::ErrorKind::NotEnoughSamples]
    /// or [`ErrorKind::NotEnoughSpace`][crate::error::ErrorKind::NotEnoughSpace]
    /// instead and let the scheduler's idle policy decide when to retry.
    /// Returning a terminal [`ErrorKind`][crate::error::ErrorKind] stops the
    /// whole graph.
    fn procedure(&mut self, outputs: &Self::Outputs) -> StepResult;
}
