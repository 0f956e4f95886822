//! A fixed-size worker pool, each worker driving a static, declaration-order
//! round-robin partition of the runners (see the open question on
//! partitioning strategy in the crate's design notes).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrayvec::ArrayVec;

use crate::flowgraph::FlowGraphConfig;
use crate::runner::RunnerHandle;
use crate::task::TaskPolicy;

use super::{publish_runtime, step_once, AdaptiveState, BlockExecutionStats, CrashState, StepOutcome};

/// Spawns `num_workers` (clamped to `[1, N]`) worker tasks, partitioning
/// `runners` among them round-robin by index. Each worker then loops
/// round-robin over *its own* partition, applying the per-runner
/// step-and-backoff logic to one runner at a time. A runner is always
/// driven by exactly one worker, preserving the SPSC single-reader/
/// single-writer invariant on its channels.
pub(crate) fn spawn_workers<P: TaskPolicy, const N: usize>(
    policy: &Arc<P>,
    runners: Vec<Box<dyn RunnerHandle>>,
    stats: &[Arc<BlockExecutionStats>],
    config: &Arc<FlowGraphConfig>,
    stop_flag: &Arc<AtomicBool>,
    crash: &Arc<CrashState>,
    num_workers: usize,
) -> Vec<P::JoinHandle> {
    let num_workers = num_workers.clamp(1, N.max(1));

    let mut partitions: Vec<ArrayVec<usize, N>> = (0..num_workers).map(|_| ArrayVec::new()).collect();
    for i in 0..runners.len() {
        partitions[i % num_workers].push(i);
    }

    let mut runner_slots: Vec<Option<Box<dyn RunnerHandle>>> = runners.into_iter().map(Some).collect();

    partitions
        .into_iter()
        .filter(|indices| !indices.is_empty())
        .enumerate()
        .map(|(worker_idx, indices)| {
            let mut group: Vec<(Box<dyn RunnerHandle>, Arc<BlockExecutionStats>)> = indices
                .iter()
                .map(|&i| {
                    let runner = runner_slots[i].take().expect("each runner index is assigned to exactly one worker partition");
                    (runner, Arc::clone(&stats[i]))
                })
                .collect();

            for (runner, stats) in &group {
                stats.set_name(runner.name());
            }

            let worker_policy = Arc::clone(policy);
            let config = Arc::clone(config);
            let stop_flag = Arc::clone(stop_flag);
            let crash = Arc::clone(crash);
            let name = format!("flowgraph-pool-{worker_idx}");

            policy.spawn(&name, move || {
                let t_start = Instant::now();
                let mut adaptive_states: Vec<AdaptiveState> = group.iter().map(|_| AdaptiveState::default()).collect();
                let mut cursor = 0usize;
                while !stop_flag.load(Ordering::Relaxed) {
                    let (runner, stats) = &mut group[cursor];
                    let outcome = step_once(
                        runner.as_mut(),
                        stats,
                        &mut adaptive_states[cursor],
                        &config,
                        |us| worker_policy.sleep_us(us),
                        || worker_policy.yield_now(),
                        &crash,
                    );
                    if let StepOutcome::Terminal = outcome {
                        stop_flag.store(true, Ordering::Relaxed);
                        break;
                    }
                    cursor = (cursor + 1) % group.len();
                }
                for (_, stats) in &group {
                    publish_runtime(stats, t_start);
                }
            })
        })
        .collect()
}
