//! Owns the tuple of runners and the set of worker tasks that drive them.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::error::CrashInfo;
use crate::runner::RunnerHandle;
use crate::scheduler::{fixed_pool, thread_per_block, BlockExecutionStats, CrashState, SchedulerKind};
use crate::task::TaskPolicy;

/// Tunable knobs for one [`FlowGraph::run`]. Defaults: `ThreadPerBlock`,
/// adaptive sleep off, detailed stats on.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowGraphConfig {
    /// Dispatch strategy.
    pub scheduler: SchedulerKind,
    /// Thread-pool size; ignored under [`SchedulerKind::ThreadPerBlock`].
    pub num_workers: usize,
    /// Enables the idle backoff policy below.
    pub adaptive_sleep: bool,
    /// Geometric ramp-up factor applied to the sleep target on sustained
    /// starvation. Must be `>= 1.0`.
    pub adaptive_sleep_multiplier: f64,
    /// Upper bound on the adaptive sleep target, in microseconds.
    pub adaptive_sleep_max_us: f64,
    /// Consecutive transient-failure count that arms the ramp-up.
    pub adaptive_sleep_fail_threshold: usize,
    /// Enables per-step stat bookkeeping beyond the adaptive-sleep target.
    pub collect_detailed_stats: bool,
}

impl Default for FlowGraphConfig {
    fn default() -> Self {
        FlowGraphConfig {
            scheduler: SchedulerKind::ThreadPerBlock,
            num_workers: 1,
            adaptive_sleep: false,
            adaptive_sleep_multiplier: 1.5,
            adaptive_sleep_max_us: 5000.0,
            adaptive_sleep_fail_threshold: 50,
            collect_detailed_stats: true,
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

/// Owns a fixed-size set of `N` runners, one [`BlockExecutionStats`] per
/// runner, the worker tasks driving them (spawned via a [`TaskPolicy`]),
/// and the graph-wide stop flag. Parameterized by the task policy so the
/// same graph code runs hosted or on an RTOS target.
///
/// Not copyable (no `Clone` impl). Its `Drop` impl calls [`stop`][FlowGraph::stop].
pub struct FlowGraph<P: TaskPolicy, const N: usize> {
    policy: Arc<P>,
    runners: Mutex<Option<Vec<Box<dyn RunnerHandle>>>>,
    stats: [Arc<BlockExecutionStats>; N],
    stop_flag: Arc<AtomicBool>,
    crash: Arc<CrashState>,
    config: RwLock<FlowGraphConfig>,
    state: AtomicU8,
    handles: Mutex<Vec<P::JoinHandle>>,
    started_at: Mutex<Option<Instant>>,
}

impl<P: TaskPolicy, const N: usize> FlowGraph<P, N> {
    /// Builds a graph from `N` runners and a task policy. Call [`run`][Self::run]
    /// to start it.
    pub fn new(runners: [Box<dyn RunnerHandle>; N], policy: P) -> Self {
        let stats = std::array::from_fn(|_| Arc::new(BlockExecutionStats::new()));
        FlowGraph {
            policy: Arc::new(policy),
            runners: Mutex::new(Some(runners.into())),
            stats,
            stop_flag: Arc::new(AtomicBool::new(false)),
            crash: Arc::new(CrashState::new()),
            config: RwLock::new(FlowGraphConfig::default()),
            state: AtomicU8::new(State::Created as u8),
            handles: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    /// Registers the callback invoked at most once, the first time any
    /// runner's step returns a terminal error.
    pub fn set_on_crash_cb(&self, cb: impl Fn(&CrashInfo) + Send + Sync + 'static) {
        self.crash.set_callback(Box::new(cb));
    }

    /// Records `config`, then launches one worker per runner
    /// ([`SchedulerKind::ThreadPerBlock`]) or a fixed pool of
    /// `config.num_workers` workers partitioning the runners round-robin
    /// ([`SchedulerKind::FixedThreadPool`]).
    ///
    /// # Panics
    /// If called more than once on the same graph.
    pub fn run(&self, config: FlowGraphConfig) {
        let runners = self.runners.lock().take().expect("FlowGraph::run called more than once");
        *self.config.write() = config;
        self.stop_flag.store(false, Ordering::Relaxed);
        self.state.store(State::Running as u8, Ordering::Release);
        *self.started_at.lock() = Some(Instant::now());
        info!(
            target: "scheduler::run",
            scheduler = ?config.scheduler,
            num_runners = N,
            num_workers = config.num_workers,
            "starting"
        );

        let config = Arc::new(config);
        let handles = match config.scheduler {
            SchedulerKind::ThreadPerBlock => {
                thread_per_block::spawn_workers(&self.policy, runners, &self.stats, &config, &self.stop_flag, &self.crash)
            }
            SchedulerKind::FixedThreadPool => fixed_pool::spawn_workers::<P, N>(
                &self.policy,
                runners,
                &self.stats,
                &config,
                &self.stop_flag,
                &self.crash,
                config.num_workers,
            ),
        };
        *self.handles.lock() = handles;
    }

    /// Sets the stop flag and joins every worker task. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.state.store(State::Stopping as u8, Ordering::Release);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            self.policy.join(handle);
        }
        self.state.store(State::Stopped as u8, Ordering::Release);
        let elapsed_us = self.started_at.lock().take().map(|t| t.elapsed().as_micros() as u64).unwrap_or(0);
        info!(target: "scheduler::stop", elapsed_us, "stopped");
    }

    /// Convenience: [`run`][Self::run], sleep the caller for `duration`,
    /// then [`stop`][Self::stop].
    pub fn run_for(&self, config: FlowGraphConfig, duration: Duration) {
        self.run(config);
        std::thread::sleep(duration);
        self.stop();
    }

    /// True once the stop flag has been set, whether by an explicit
    /// [`stop`][Self::stop] call or a terminal step error. Workers may
    /// still be mid-join; `stats()` is only guaranteed stable once every
    /// worker has joined.
    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// The config passed to the last [`run`][Self::run] call, or the
    /// default if the graph hasn't run yet.
    pub fn config(&self) -> FlowGraphConfig {
        *self.config.read()
    }

    /// Per-runner execution counters, in runner-declaration order.
    pub fn stats(&self) -> &[Arc<BlockExecutionStats>] {
        &self.stats
    }
}

impl<P: TaskPolicy, const N: usize> Drop for FlowGraph<P, N> {
    fn drop(&mut self) {
        self.stop();
    }
}
