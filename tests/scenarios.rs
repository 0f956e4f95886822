//! Black-box seed scenarios run against the public API: a small graph is
//! wired up per test the way an embedding application would, driven for a
//! bounded wall-clock window, then inspected for the behavior the runtime
//! contract promises.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dataflow_rt::block::Block;
use dataflow_rt::channel::{Channel, SpscChannel};
use dataflow_rt::error::{CrashInfo, ErrorKind, StepResult};
use dataflow_rt::flowgraph::{FlowGraph, FlowGraphConfig};
use dataflow_rt::runner::{OutputRef, Runner, RunnerHandle};
use dataflow_rt::scheduler::SchedulerKind;
use dataflow_rt::task::HostedThreads;

/// Pushes `0.0, 1.0, .. < limit` as fast as the output channel allows.
struct CountingSource {
    name: String,
    next: f32,
    limit: f32,
}

impl Block for CountingSource {
    type Outputs = (OutputRef<Channel<f32>>,);

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, outputs: &Self::Outputs) -> StepResult {
        if self.next >= self.limit {
            return Err(ErrorKind::NotEnoughSamples);
        }
        if outputs.0.try_push(self.next) {
            self.next += 1.0;
            Ok(())
        } else {
            Err(ErrorKind::NotEnoughSpace)
        }
    }
}

/// Pushes the same constant value every step, forever.
struct ConstSource {
    name: String,
    value: f32,
}

impl Block for ConstSource {
    type Outputs = (OutputRef<Channel<f32>>,);

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, outputs: &Self::Outputs) -> StepResult {
        if outputs.0.try_push(self.value) {
            Ok(())
        } else {
            Err(ErrorKind::NotEnoughSpace)
        }
    }
}

/// Copies one input to one output.
struct PassThrough {
    name: String,
    input: Channel<f32>,
}

impl Block for PassThrough {
    type Outputs = (OutputRef<Channel<f32>>,);

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, outputs: &Self::Outputs) -> StepResult {
        if outputs.0.space() == 0 {
            return Err(ErrorKind::NotEnoughSpace);
        }
        match self.input.try_pop() {
            Some(v) => {
                outputs.0.push(v);
                Ok(())
            }
            None => Err(ErrorKind::NotEnoughSamples),
        }
    }
}

/// Copies one input to two outputs.
struct FanoutBlock {
    name: String,
    input: Channel<f32>,
}

impl Block for FanoutBlock {
    type Outputs = (OutputRef<Channel<f32>>, OutputRef<Channel<f32>>);

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, outputs: &Self::Outputs) -> StepResult {
        if outputs.0.space() == 0 || outputs.1.space() == 0 {
            return Err(ErrorKind::NotEnoughSpace);
        }
        match self.input.try_pop() {
            Some(v) => {
                outputs.0.push(v);
                outputs.1.push(v);
                Ok(())
            }
            None => Err(ErrorKind::NotEnoughSamples),
        }
    }
}

/// Sums three inputs into one output, only when all three have a sample.
struct AddBlock {
    name: String,
    a: Channel<f32>,
    b: Channel<f32>,
    c: Channel<f32>,
}

impl Block for AddBlock {
    type Outputs = (OutputRef<Channel<f32>>,);

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, outputs: &Self::Outputs) -> StepResult {
        if self.a.size() == 0 || self.b.size() == 0 || self.c.size() == 0 {
            return Err(ErrorKind::NotEnoughSamples);
        }
        if outputs.0.space() == 0 {
            return Err(ErrorKind::NotEnoughSpace);
        }
        let sum = self.a.pop() + self.b.pop() + self.c.pop();
        outputs.0.push(sum);
        Ok(())
    }
}

/// Collects every popped value into a `Vec` the test thread can inspect.
struct CollectingSink {
    name: String,
    input: Channel<f32>,
    received: Arc<Mutex<Vec<f32>>>,
}

impl Block for CollectingSink {
    type Outputs = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, _outputs: &()) -> StepResult {
        match self.input.try_pop() {
            Some(v) => {
                self.received.lock().unwrap().push(v);
                Ok(())
            }
            None => Err(ErrorKind::NotEnoughSamples),
        }
    }
}

/// Like [`CollectingSink`] but refuses to pop more than once per `period`;
/// models a slow consumer without sleeping inside the step.
struct PacedSink {
    name: String,
    input: Channel<f32>,
    received: Arc<Mutex<Vec<f32>>>,
    last_pop: Instant,
    period: Duration,
}

impl Block for PacedSink {
    type Outputs = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, _outputs: &()) -> StepResult {
        if self.last_pop.elapsed() < self.period {
            return Err(ErrorKind::ProcedureError);
        }
        match self.input.try_pop() {
            Some(v) => {
                self.received.lock().unwrap().push(v);
                self.last_pop = Instant::now();
                Ok(())
            }
            None => Err(ErrorKind::NotEnoughSamples),
        }
    }
}

#[test]
fn passthrough_sanity() {
    let mut sink = Box::new(CollectingSink {
        name: "sink".into(),
        input: Channel::new(1024),
        received: Arc::new(Mutex::new(Vec::new())),
    });
    let received = Arc::clone(&sink.received);
    let mut middle = Box::new(PassThrough { name: "middle".into(), input: Channel::new(1024) });
    let mut source = Box::new(CountingSource { name: "source".into(), next: 0.0, limit: 1000.0 });

    let middle_runner = Runner::new(&mut middle, (OutputRef::new(&sink.input),));
    let source_runner = Runner::new(&mut source, (OutputRef::new(&middle.input),));
    let sink_runner = Runner::new(&mut sink, ());

    let graph = FlowGraph::new(
        [
            Box::new(source_runner) as Box<dyn RunnerHandle>,
            Box::new(middle_runner),
            Box::new(sink_runner),
        ],
        HostedThreads,
    );
    graph.run_for(FlowGraphConfig::default(), Duration::from_millis(200));
    assert!(graph.is_stopped());

    let got = received.lock().unwrap();
    let expected: Vec<f32> = (0..1000).map(|i| i as f32).collect();
    assert_eq!(*got, expected);
}

#[test]
fn backpressure_never_exceeds_channel_capacity() {
    const CAPACITY: usize = 8;
    let mut sink = Box::new(PacedSink {
        name: "sink".into(),
        input: Channel::new(CAPACITY),
        received: Arc::new(Mutex::new(Vec::new())),
        last_pop: Instant::now(),
        period: Duration::from_millis(10),
    });
    assert_eq!(sink.input.capacity(), CAPACITY);
    let received = Arc::clone(&sink.received);
    let mut source = Box::new(CountingSource { name: "source".into(), next: 0.0, limit: f32::MAX });

    let source_runner = Runner::new(&mut source, (OutputRef::new(&sink.input),));
    let sink_input_capacity = sink.input.capacity();
    let sink_runner = Runner::new(&mut sink, ());

    let graph = FlowGraph::new(
        [Box::new(source_runner) as Box<dyn RunnerHandle>, Box::new(sink_runner)],
        HostedThreads,
    );
    graph.run_for(FlowGraphConfig::default(), Duration::from_millis(200));
    assert!(graph.is_stopped());

    let got = received.lock().unwrap();
    assert!(!got.is_empty());
    for (i, v) in got.iter().enumerate() {
        assert_eq!(*v, i as f32, "sink sequence must be contiguous starting at 0");
    }
    assert_eq!(sink_input_capacity, CAPACITY);
    assert!(sink.input.size() <= CAPACITY, "channel size must never exceed its capacity");
}

#[test]
fn multi_input_adder_sums_three_constant_streams() {
    let mut sink = Box::new(CollectingSink {
        name: "sink".into(),
        input: Channel::new(1024),
        received: Arc::new(Mutex::new(Vec::new())),
    });
    let received = Arc::clone(&sink.received);
    let mut adder = Box::new(AddBlock {
        name: "adder".into(),
        a: Channel::new(1024),
        b: Channel::new(1024),
        c: Channel::new(1024),
    });
    let mut src_a = Box::new(ConstSource { name: "a".into(), value: 1.0 });
    let mut src_b = Box::new(ConstSource { name: "b".into(), value: 2.0 });
    let mut src_c = Box::new(ConstSource { name: "c".into(), value: 3.0 });

    let adder_runner = Runner::new(&mut adder, (OutputRef::new(&sink.input),));
    let a_runner = Runner::new(&mut src_a, (OutputRef::new(&adder.a),));
    let b_runner = Runner::new(&mut src_b, (OutputRef::new(&adder.b),));
    let c_runner = Runner::new(&mut src_c, (OutputRef::new(&adder.c),));
    let sink_runner = Runner::new(&mut sink, ());

    let graph = FlowGraph::new(
        [
            Box::new(a_runner) as Box<dyn RunnerHandle>,
            Box::new(b_runner),
            Box::new(c_runner),
            Box::new(adder_runner),
            Box::new(sink_runner),
        ],
        HostedThreads,
    );
    graph.run_for(FlowGraphConfig::default(), Duration::from_millis(50));
    assert!(graph.is_stopped());

    let got = received.lock().unwrap();
    assert!(!got.is_empty());
    assert!(got.iter().all(|&v| v == 6.0));
}

#[test]
fn fanout_both_outputs_see_the_same_sequence() {
    let mut sink_a = Box::new(CollectingSink {
        name: "sink_a".into(),
        input: Channel::new(1024),
        received: Arc::new(Mutex::new(Vec::new())),
    });
    let mut sink_b = Box::new(CollectingSink {
        name: "sink_b".into(),
        input: Channel::new(1024),
        received: Arc::new(Mutex::new(Vec::new())),
    });
    let received_a = Arc::clone(&sink_a.received);
    let received_b = Arc::clone(&sink_b.received);
    let mut fanout = Box::new(FanoutBlock { name: "fanout".into(), input: Channel::new(1024) });
    let mut source = Box::new(CountingSource { name: "source".into(), next: 0.0, limit: 500.0 });

    let fanout_runner = Runner::new(&mut fanout, (OutputRef::new(&sink_a.input), OutputRef::new(&sink_b.input)));
    let source_runner = Runner::new(&mut source, (OutputRef::new(&fanout.input),));
    let sink_a_runner = Runner::new(&mut sink_a, ());
    let sink_b_runner = Runner::new(&mut sink_b, ());

    let graph = FlowGraph::new(
        [
            Box::new(source_runner) as Box<dyn RunnerHandle>,
            Box::new(fanout_runner),
            Box::new(sink_a_runner),
            Box::new(sink_b_runner),
        ],
        HostedThreads,
    );
    graph.run_for(FlowGraphConfig::default(), Duration::from_millis(200));
    assert!(graph.is_stopped());

    let a = received_a.lock().unwrap();
    let b = received_b.lock().unwrap();
    assert!(!a.is_empty());
    assert_eq!(*a, *b);
    for (i, v) in a.iter().enumerate() {
        assert_eq!(*v, i as f32);
    }
}

#[test]
fn fixed_thread_pool_scheduler_also_drains_in_order() {
    let mut sink = Box::new(CollectingSink {
        name: "sink".into(),
        input: Channel::new(1024),
        received: Arc::new(Mutex::new(Vec::new())),
    });
    let received = Arc::clone(&sink.received);
    let mut middle = Box::new(PassThrough { name: "middle".into(), input: Channel::new(1024) });
    let mut source = Box::new(CountingSource { name: "source".into(), next: 0.0, limit: 200.0 });

    let middle_runner = Runner::new(&mut middle, (OutputRef::new(&sink.input),));
    let source_runner = Runner::new(&mut source, (OutputRef::new(&middle.input),));
    let sink_runner = Runner::new(&mut sink, ());

    let graph = FlowGraph::new(
        [
            Box::new(source_runner) as Box<dyn RunnerHandle>,
            Box::new(middle_runner),
            Box::new(sink_runner),
        ],
        HostedThreads,
    );
    let config = FlowGraphConfig { scheduler: SchedulerKind::FixedThreadPool, num_workers: 2, ..Default::default() };
    graph.run_for(config, Duration::from_millis(200));
    assert!(graph.is_stopped());

    let got = received.lock().unwrap();
    let expected: Vec<f32> = (0..200).map(|i| i as f32).collect();
    assert_eq!(*got, expected);
}

struct FlakyBlock {
    name: String,
    starve_until: Instant,
    succeeded_once: bool,
}

impl Block for FlakyBlock {
    type Outputs = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, _outputs: &()) -> StepResult {
        if !self.succeeded_once && Instant::now() < self.starve_until {
            return Err(ErrorKind::NotEnoughSamples);
        }
        self.succeeded_once = true;
        Ok(())
    }
}

#[test]
fn adaptive_sleep_ramps_up_then_decays_on_success() {
    let mut flaky =
        Box::new(FlakyBlock { name: "flaky".into(), starve_until: Instant::now() + Duration::from_millis(30), succeeded_once: false });
    let runner = Runner::new(&mut flaky, ());

    let graph = FlowGraph::new([Box::new(runner) as Box<dyn RunnerHandle>], HostedThreads);
    let config = FlowGraphConfig {
        adaptive_sleep: true,
        adaptive_sleep_fail_threshold: 2,
        adaptive_sleep_multiplier: 2.0,
        adaptive_sleep_max_us: 5_000.0,
        ..Default::default()
    };
    graph.run(config);

    std::thread::sleep(Duration::from_millis(15));
    let during_starvation = graph.stats()[0].current_adaptive_sleep_us();
    assert!(during_starvation > 0.0, "sleep target should have ramped up while starved");

    std::thread::sleep(Duration::from_millis(60));
    let after_success = graph.stats()[0].current_adaptive_sleep_us();
    graph.stop();

    assert!(
        after_success < during_starvation,
        "sleep target should decay well below its starved peak after the block starts succeeding (was {during_starvation}, now {after_success})"
    );
}

struct CrashyBlock {
    name: String,
    first_step: bool,
}

impl Block for CrashyBlock {
    type Outputs = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn procedure(&mut self, _outputs: &()) -> StepResult {
        if self.first_step {
            self.first_step = false;
            Ok(())
        } else {
            Err(ErrorKind::TermIoError)
        }
    }
}

#[test]
fn terminal_error_fires_crash_callback_exactly_once() {
    let mut crashy = Box::new(CrashyBlock { name: "crashy".into(), first_step: true });
    let runner = Runner::new(&mut crashy, ());

    let graph = FlowGraph::new([Box::new(runner) as Box<dyn RunnerHandle>], HostedThreads);
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);
    graph.set_on_crash_cb(move |info: &CrashInfo| {
        assert_eq!(info.kind, ErrorKind::TermIoError);
        assert_eq!(info.block_name, "crashy");
        fired_cb.fetch_add(1, Ordering::SeqCst);
    });

    graph.run(FlowGraphConfig::default());
    std::thread::sleep(Duration::from_millis(50));
    assert!(graph.is_stopped());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    graph.stop();
}
