//! Drives runners, applies the idle backoff policy, collects per-block
//! stats, and signals graph-wide stop/crash. Two dispatch strategies share
//! the same per-step logic: [`thread_per_block`] (one worker per runner)
//! and [`fixed_pool`] (a static round-robin partition of runners across a
//! fixed set of workers).

pub mod fixed_pool;
pub mod thread_per_block;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{CrashInfo, ErrorKind};
use crate::flowgraph::FlowGraphConfig;
use crate::runner::RunnerHandle;

/// Sentinel stored in [`BlockExecutionStats`]'s packed `last_error_kind`
/// byte when no failed step has been observed yet.
const NO_ERROR_YET: u8 = u8::MAX;

/// Dispatch strategy named by [`FlowGraphConfig::scheduler`][crate::flowgraph::FlowGraphConfig].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SchedulerKind {
    /// One worker task per runner.
    #[default]
    ThreadPerBlock,
    /// A fixed-size pool of workers, each driving a static, declaration-order
    /// round-robin partition of the runners.
    FixedThreadPool,
}

/// Per-block counters mutated only by the worker currently driving that
/// block's runner. Readers (including [`FlowGraph::stats`][crate::flowgraph::FlowGraph::stats])
/// may observe slightly stale values while the graph runs; values are
/// stable once the graph is `Stopped`.
pub struct BlockExecutionStats {
    name: OnceLock<String>,
    successful_procedures: AtomicU64,
    failed_procedures: AtomicU64,
    avg_dead_time_us_bits: AtomicU64,
    total_dead_time_s_bits: AtomicU64,
    current_adaptive_sleep_us_bits: AtomicU64,
    total_runtime_s_bits: AtomicU64,
    last_error_kind: AtomicU8,
}

impl Default for BlockExecutionStats {
    fn default() -> Self {
        BlockExecutionStats {
            name: OnceLock::new(),
            successful_procedures: AtomicU64::new(0),
            failed_procedures: AtomicU64::new(0),
            avg_dead_time_us_bits: AtomicU64::new(0),
            total_dead_time_s_bits: AtomicU64::new(0),
            current_adaptive_sleep_us_bits: AtomicU64::new(0),
            total_runtime_s_bits: AtomicU64::new(0),
            last_error_kind: AtomicU8::new(NO_ERROR_YET),
        }
    }
}

impl BlockExecutionStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_name(&self, name: &str) {
        let _ = self.name.set(name.to_string());
    }

    pub fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("")
    }

    pub fn successful_procedures(&self) -> u64 {
        self.successful_procedures.load(Ordering::Relaxed)
    }

    pub fn failed_procedures(&self) -> u64 {
        self.failed_procedures.load(Ordering::Relaxed)
    }

    pub fn avg_dead_time_us(&self) -> f64 {
        f64::from_bits(self.avg_dead_time_us_bits.load(Ordering::Relaxed))
    }

    pub fn total_dead_time_s(&self) -> f64 {
        f64::from_bits(self.total_dead_time_s_bits.load(Ordering::Relaxed))
    }

    pub fn current_adaptive_sleep_us(&self) -> f64 {
        f64::from_bits(self.current_adaptive_sleep_us_bits.load(Ordering::Relaxed))
    }

    pub fn total_runtime_s(&self) -> f64 {
        f64::from_bits(self.total_runtime_s_bits.load(Ordering::Relaxed))
    }

    /// Most recent non-success [`ErrorKind`] observed for this block, or
    /// `None` if no step has failed yet. Only updated while
    /// [`collect_detailed_stats`][crate::flowgraph::FlowGraphConfig::collect_detailed_stats]
    /// is on.
    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_ordinal(self.last_error_kind.load(Ordering::Relaxed))
    }

    fn record_success(&self) {
        self.successful_procedures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, dead_time_s: f64, kind: ErrorKind) {
        let failed = self.failed_procedures.fetch_add(1, Ordering::Relaxed) + 1;
        fetch_update_f64(&self.total_dead_time_s_bits, |t| t + dead_time_s);
        fetch_update_f64(&self.avg_dead_time_us_bits, |avg| avg + (dead_time_s * 1e6 - avg) / (failed as f64));
        self.last_error_kind.store(kind as u8, Ordering::Relaxed);
    }

    fn record_failure_minimal(&self, kind: ErrorKind) {
        self.failed_procedures.fetch_add(1, Ordering::Relaxed);
        self.last_error_kind.store(kind as u8, Ordering::Relaxed);
    }

    fn set_current_adaptive_sleep_us(&self, v: f64) {
        self.current_adaptive_sleep_us_bits.store(v.to_bits(), Ordering::Relaxed);
    }

    fn set_total_runtime_s(&self, v: f64) {
        self.total_runtime_s_bits.store(v.to_bits(), Ordering::Relaxed);
    }
}

// The atomics and `OnceLock` backing this struct aren't themselves
// `Serialize`, so this takes a one-time snapshot of every accessor instead
// of deriving on the fields. Write-only by design: these counters are an
// outbound telemetry snapshot, not a format any caller reconstructs a live
// `BlockExecutionStats` from, so no matching `Deserialize` is provided.
#[cfg(feature = "serde")]
impl serde::Serialize for BlockExecutionStats {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("BlockExecutionStats", 8)?;
        state.serialize_field("name", self.name())?;
        state.serialize_field("successful_procedures", &self.successful_procedures())?;
        state.serialize_field("failed_procedures", &self.failed_procedures())?;
        state.serialize_field("avg_dead_time_us", &self.avg_dead_time_us())?;
        state.serialize_field("total_dead_time_s", &self.total_dead_time_s())?;
        state.serialize_field("current_adaptive_sleep_us", &self.current_adaptive_sleep_us())?;
        state.serialize_field("total_runtime_s", &self.total_runtime_s())?;
        state.serialize_field("last_error_kind", &self.last_error_kind())?;
        state.end()
    }
}

fn fetch_update_f64(cell: &AtomicU64, f: impl Fn(f64) -> f64) {
    let mut cur = cell.load(Ordering::Relaxed);
    loop {
        let new = f(f64::from_bits(cur)).to_bits();
        match cell.compare_exchange_weak(cur, new, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => cur = actual,
        }
    }
}

/// Per-runner adaptive-sleep bookkeeping. Touched only by the worker
/// currently stepping that runner, so it's a plain (non-atomic) value
/// living next to the runner rather than in [`BlockExecutionStats`].
#[derive(Debug, Default)]
pub(crate) struct AdaptiveState {
    consecutive_fails: usize,
    current_sleep_us: f64,
}

/// Holds the at-most-once crash callback and the claim on "first terminal
/// error wins".
pub(crate) struct CrashState {
    fired: AtomicBool,
    callback: Mutex<Option<Box<dyn Fn(&CrashInfo) + Send + Sync>>>,
}

impl CrashState {
    pub(crate) fn new() -> Self {
        CrashState { fired: AtomicBool::new(false), callback: Mutex::new(None) }
    }

    pub(crate) fn set_callback(&self, cb: Box<dyn Fn(&CrashInfo) + Send + Sync>) {
        *self.callback.lock() = Some(cb);
    }

    fn fire(&self, info: CrashInfo) {
        if self.fired.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            warn!(target: "scheduler::crash", block_name = %info.block_name, error_kind = ?info.kind, "terminal error, stopping");
            if let Some(cb) = self.callback.lock().as_ref() {
                cb(&info);
            }
        }
    }
}

/// Outcome of one [`step_once`] call.
pub(crate) enum StepOutcome {
    /// The worker should keep looping.
    Continue,
    /// A terminal error fired; the worker should stop.
    Terminal,
}

/// Runs one step of `runner`, updates `stats` and `adaptive`, and applies
/// the idle backoff policy: yield on an isolated transient failure,
/// geometric-ramp sleep once `consecutive_fails` exceeds the configured
/// threshold, halved on the next success.
pub(crate) fn step_once(
    runner: &mut dyn RunnerHandle,
    stats: &BlockExecutionStats,
    adaptive: &mut AdaptiveState,
    config: &FlowGraphConfig,
    sleep_us: impl FnOnce(u64),
    yield_now: impl FnOnce(),
    crash: &CrashState,
) -> StepOutcome {
    let t_before = Instant::now();
    let result = runner.step();

    match result {
        Ok(()) => {
            if config.collect_detailed_stats {
                stats.record_success();
            }
            adaptive.consecutive_fails = 0;
            if config.adaptive_sleep {
                adaptive.current_sleep_us *= 0.5;
                stats.set_current_adaptive_sleep_us(adaptive.current_sleep_us);
            }
            StepOutcome::Continue
        }
        Err(kind) if kind.is_terminal() => {
            crash.fire(CrashInfo { block_name: runner.name().to_string(), kind });
            StepOutcome::Terminal
        }
        Err(kind) if kind.is_starvation() => {
            let dt = t_before.elapsed().as_secs_f64();
            if config.collect_detailed_stats {
                stats.record_failure(dt, kind);
            }
            adaptive.consecutive_fails += 1;
            if config.adaptive_sleep {
                if adaptive.consecutive_fails > config.adaptive_sleep_fail_threshold {
                    adaptive.current_sleep_us = (adaptive.current_sleep_us * config.adaptive_sleep_multiplier + 1.0).min(config.adaptive_sleep_max_us);
                    stats.set_current_adaptive_sleep_us(adaptive.current_sleep_us);
                    debug!(
                        target: "adaptive_sleep::ramp",
                        block_name = runner.name(),
                        current_sleep_us = adaptive.current_sleep_us,
                        "ramp"
                    );
                    sleep_us(adaptive.current_sleep_us as u64);
                } else {
                    yield_now();
                }
            } else {
                yield_now();
            }
            StepOutcome::Continue
        }
        Err(kind) => {
            trace!(?kind, block = runner.name(), "transient, non-starvation step error");
            if config.collect_detailed_stats {
                stats.record_failure_minimal(kind);
            }
            yield_now();
            StepOutcome::Continue
        }
    }
}

pub(crate) fn publish_runtime(stats: &BlockExecutionStats, t_start: Instant) {
    stats.set_total_runtime_s(t_start.elapsed().as_secs_f64());
}
