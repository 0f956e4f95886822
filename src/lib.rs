//! A streaming-dataflow runtime for real-time signal-processing graphs.
//!
//! A graph is a fixed set of [`Block`](block::Block)s connected by bounded
//! single-producer/single-consumer [`channel`]s. Topology is fixed at
//! construction; a [`FlowGraph`](flowgraph::FlowGraph) then drives every
//! block's step function on a pool of workers chosen by
//! [`SchedulerKind`](scheduler::SchedulerKind) until stopped or a block
//! reports a terminal error.
//!
//! The same block code runs on hosted desktop threads or on a bare-metal/
//! RTOS target (FreeRTOS, ThreadX, Zephyr). The scheduler only depends on
//! [`TaskPolicy`](task::TaskPolicy), never on `std::thread` directly.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use dataflow_rt::block::Block;
//! use dataflow_rt::channel::{Channel, SpscChannel};
//! use dataflow_rt::error::{ErrorKind, StepResult};
//! use dataflow_rt::flowgraph::{FlowGraph, FlowGraphConfig};
//! use dataflow_rt::runner::{OutputRef, Runner};
//! use dataflow_rt::task::HostedThreads;
//!
//! struct Counter {
//!     name: String,
//!     next: f32,
//! }
//!
//! impl Block for Counter {
//!     type Outputs = (OutputRef<Channel<f32>>,);
//!
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//!
//!     fn procedure(&mut self, outputs: &Self::Outputs) -> StepResult {
//!         if outputs.0.try_push(self.next) {
//!             self.next += 1.0;
//!             Ok(())
//!         } else {
//!             Err(ErrorKind::NotEnoughSpace)
//!         }
//!     }
//! }
//!
//! let out = Channel::<f32>::new(64);
//! let mut source = Counter { name: "source".into(), next: 0.0 };
//! let runner = Runner::new(&mut source, (OutputRef::new(&out),));
//!
//! let graph = FlowGraph::new([Box::new(runner)], HostedThreads);
//! graph.run_for(FlowGraphConfig::default(), Duration::from_millis(10));
//! assert!(graph.is_stopped());
//! ```

pub mod block;
pub mod channel;
pub mod error;
pub mod flowgraph;
pub mod runner;
pub mod scheduler;
pub mod slab;
pub mod sys;
pub mod task;
