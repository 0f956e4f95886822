//! One worker task per runner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::flowgraph::FlowGraphConfig;
use crate::runner::RunnerHandle;
use crate::task::TaskPolicy;

use super::{publish_runtime, step_once, AdaptiveState, BlockExecutionStats, CrashState, StepOutcome};

/// Spawns exactly one worker per entry in `runners`, paired positionally
/// with `stats`.
pub(crate) fn spawn_workers<P: TaskPolicy>(
    policy: &Arc<P>,
    runners: Vec<Box<dyn RunnerHandle>>,
    stats: &[Arc<BlockExecutionStats>],
    config: &Arc<FlowGraphConfig>,
    stop_flag: &Arc<AtomicBool>,
    crash: &Arc<CrashState>,
) -> Vec<P::JoinHandle> {
    runners
        .into_iter()
        .zip(stats.iter().cloned())
        .map(|(mut runner, stats)| {
            let worker_policy = Arc::clone(policy);
            let config = Arc::clone(config);
            let stop_flag = Arc::clone(stop_flag);
            let crash = Arc::clone(crash);
            let name = runner.name().to_string();
            stats.set_name(&name);

            policy.spawn(&name, move || {
                let t_start = Instant::now();
                let mut adaptive = AdaptiveState::default();
                while !stop_flag.load(Ordering::Relaxed) {
                    let outcome = step_once(
                        runner.as_mut(),
                        &stats,
                        &mut adaptive,
                        &config,
                        |us| worker_policy.sleep_us(us),
                        || worker_policy.yield_now(),
                        &crash,
                    );
                    if let StepOutcome::Terminal = outcome {
                        stop_flag.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                publish_runtime(&stats, t_start);
            })
        })
        .collect()
}
