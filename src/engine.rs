//! The simulation driver.
//!
//! A [`Simulation`] owns one scheduler and everything that schedules on it:
//! the flow graph, the actor system, telemetry samplers and the run's random
//! generator. Work is registered up front or from inside the run through
//! callbacks that receive a [`Kernel`] view.
//!
//! # Example
//!
//! ```
//! use dcsim::consumer::BoundedWork;
//! use dcsim::config::KernelConfig;
//! use dcsim::engine::Simulation;
//! use dcsim::stages::FlowSource;
//!
//! let mut sim: Simulation<()> = Simulation::new(KernelConfig::default()).unwrap();
//! let cpu = sim.kernel().add_source("cpu", FlowSource::new(100.0));
//!
//! sim.schedule_at(1_000, move |kernel| {
//!     kernel.attach_consumer("job", BoundedWork::new(500.0, 1.0), cpu);
//! });
//!
//! let summary = sim.run_until_idle();
//! assert_eq!(summary.final_time, 6_000);
//! assert_eq!(summary.consumers_exited, 1);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::actor::{ActorEvent, ActorSystem, Behavior};
use crate::config::{ConfigResult, KernelConfig};
use crate::consumer::ResourceConsumer;
use crate::error::RegistryError;
use crate::event::{Event, EventHandle};
use crate::flow::{FlowGraph, FlowStage, StageWake};
use crate::registry::{ConsumerRegistry, WorkloadSpec};
use crate::scheduler::{EventHandler, RunBudget, Scheduler};
use crate::stages::{ConsumerStage, FlowSource};
use crate::stats::{ConsumerTally, FlowStats, KernelStats, RunSummary, SchedulerStats};
use crate::types::{ActorId, InletId, OutletId, SimTime, StageId};

/// A closure run at a scheduled instant.
pub type Callback<M> = Box<dyn FnOnce(&mut Kernel<'_, M>)>;

/// A telemetry callback, invoked every export interval.
pub type Sampler = Box<dyn FnMut(SimTime, &FlowGraph)>;

/// Every event kind of a simulation.
pub enum SimEvent<M> {
    /// A flow stage asked to run.
    Stage(StageWake),
    /// Actor dispatch, delivery or timer.
    Actor(ActorEvent<M>),
    /// Telemetry sampling.
    Sample,
    /// A scheduled closure.
    Callback(Callback<M>),
}

impl<M> From<StageWake> for SimEvent<M> {
    fn from(wake: StageWake) -> Self {
        Self::Stage(wake)
    }
}

impl<M> From<ActorEvent<M>> for SimEvent<M> {
    fn from(event: ActorEvent<M>) -> Self {
        Self::Actor(event)
    }
}

impl<M: fmt::Debug> fmt::Debug for SimEvent<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(wake) => f.debug_tuple("Stage").field(wake).finish(),
            Self::Actor(event) => f.debug_tuple("Actor").field(event).finish(),
            Self::Sample => f.write_str("Sample"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Mutable view of the kernel handed to callbacks.
pub struct Kernel<'a, M> {
    pub graph: &'a mut FlowGraph,
    pub actors: &'a mut ActorSystem<M>,
    pub scheduler: &'a mut Scheduler<SimEvent<M>>,
    pub rng: &'a mut ChaCha8Rng,
    tally: &'a Rc<RefCell<ConsumerTally>>,
}

impl<'a, M: Clone + 'static> Kernel<'a, M> {
    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    /// Schedules a closure at `at`.
    pub fn schedule_at(&mut self, at: SimTime, f: impl FnOnce(&mut Kernel<'_, M>) + 'static) -> EventHandle {
        self.scheduler.schedule(at, SimEvent::Callback(Box::new(f)))
    }

    /// Adds a stage and runs it once.
    pub fn add_stage<T: FlowStage>(&mut self, name: impl Into<String>, stage: T) -> StageId {
        let id = self.graph.add_stage(name, stage);
        self.graph.flush(self.scheduler);
        id
    }

    /// Adds a source and returns its outlet.
    pub fn add_source(&mut self, name: impl Into<String>, source: FlowSource) -> OutletId {
        let (_, outlet) = source.install(self.graph, name);
        self.graph.flush(self.scheduler);
        outlet
    }

    pub fn connect(&mut self, outlet: OutletId, inlet: InletId) {
        self.graph.connect(self.scheduler, outlet, inlet);
    }

    pub fn disconnect(&mut self, outlet: OutletId) -> bool {
        self.graph.disconnect(self.scheduler, outlet)
    }

    /// Re-runs a stage at the current instant.
    pub fn invalidate(&mut self, stage: StageId) {
        self.graph.invalidate(self.scheduler, stage);
    }

    pub fn remove_stage(&mut self, stage: StageId) -> Option<Box<dyn FlowStage>> {
        self.graph.remove_stage(self.scheduler, stage)
    }

    /// Mutates a stage and propagates the change.
    pub fn update_stage<T: FlowStage, R>(&mut self, stage: StageId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.graph.update_stage(self.scheduler, stage, f)
    }

    /// Hosts `consumer` in a new stage fed by `outlet`.
    ///
    /// The consumer starts right away and its outcome is counted in the
    /// run summary.
    pub fn attach_consumer<C>(&mut self, name: impl Into<String>, consumer: C, outlet: OutletId) -> StageId
    where
        C: ResourceConsumer + 'static,
    {
        let mut stage = ConsumerStage::new(consumer);
        let tally = Rc::clone(self.tally);
        stage.on_finish(move |outcome| {
            let mut tally = tally.borrow_mut();
            if outcome.is_exited() {
                tally.exited += 1;
            } else {
                tally.failed += 1;
            }
        });
        self.tally.borrow_mut().attached += 1;

        let (id, inlet) = stage.install(self.graph, name);
        self.graph.connect(self.scheduler, outlet, inlet);
        id
    }

    /// Builds a consumer from `spec` and attaches it.
    pub fn attach_workload(
        &mut self,
        name: impl Into<String>,
        registry: &ConsumerRegistry,
        spec: &WorkloadSpec,
        outlet: OutletId,
    ) -> Result<StageId, RegistryError> {
        let consumer = registry.create(spec)?;
        Ok(self.attach_consumer(name, consumer, outlet))
    }

    pub fn spawn(&mut self, name: impl Into<String>, behavior: Behavior<M>) -> ActorId {
        self.actors.spawn(self.scheduler, name, behavior)
    }

    pub fn tell(&mut self, to: ActorId, message: M) {
        self.actors.tell(self.scheduler, to, message);
    }

    pub fn tell_after(&mut self, to: ActorId, message: M, delay: SimTime) {
        self.actors.tell_after(self.scheduler, to, message, delay);
    }

    pub fn stop_actor(&mut self, actor: ActorId) -> bool {
        self.actors.stop(self.scheduler, actor)
    }
}

/// Everything the scheduler dispatches to.
struct World<M> {
    graph: FlowGraph,
    actors: ActorSystem<M>,
    rng: ChaCha8Rng,
    samplers: Vec<Sampler>,
    sample_armed: bool,
    start_time: SimTime,
    export_interval: Option<SimTime>,
    tally: Rc<RefCell<ConsumerTally>>,
}

impl<M: Clone + 'static> World<M> {
    fn kernel<'a>(&'a mut self, scheduler: &'a mut Scheduler<SimEvent<M>>) -> Kernel<'a, M> {
        Kernel {
            graph: &mut self.graph,
            actors: &mut self.actors,
            scheduler,
            rng: &mut self.rng,
            tally: &self.tally,
        }
    }

    /// Schedules the next sample if there is anything left to observe.
    fn arm_samples(&mut self, scheduler: &mut Scheduler<SimEvent<M>>) {
        if self.sample_armed || self.samplers.is_empty() || scheduler.is_empty() {
            return;
        }
        let Some(interval) = self.export_interval else {
            return;
        };
        let elapsed = scheduler.now().saturating_sub(self.start_time);
        let next = self.start_time.saturating_add(interval.saturating_mul(elapsed / interval + 1));
        scheduler.schedule(next, SimEvent::Sample);
        self.sample_armed = true;
    }

    fn sample(&mut self, scheduler: &mut Scheduler<SimEvent<M>>) {
        self.sample_armed = false;
        let now = scheduler.now();
        tracing::trace!(now, samplers = self.samplers.len(), "sampling");
        for sampler in &mut self.samplers {
            sampler(now, &self.graph);
        }
        self.arm_samples(scheduler);
    }
}

impl<M: Clone + 'static> EventHandler<SimEvent<M>> for World<M> {
    fn handle(&mut self, scheduler: &mut Scheduler<SimEvent<M>>, event: Event<SimEvent<M>>) {
        match event.payload {
            SimEvent::Stage(wake) => self.graph.on_wake(scheduler, wake),
            SimEvent::Actor(actor_event) => self.actors.handle(scheduler, actor_event),
            SimEvent::Sample => self.sample(scheduler),
            SimEvent::Callback(callback) => callback(&mut self.kernel(scheduler)),
        }
    }
}

/// A complete simulation: scheduler, flow graph, actors and telemetry.
pub struct Simulation<M> {
    config: KernelConfig,
    scheduler: Scheduler<SimEvent<M>>,
    world: World<M>,
    /// Wall-clock time spent in run loops
    wall_time: Duration,
}

impl<M: Clone + 'static> Simulation<M> {
    /// Creates a simulation from a validated configuration.
    pub fn new(config: KernelConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: KernelConfig) -> Self {
        let world = World {
            graph: FlowGraph::with_max_steps(config.max_propagation_steps),
            actors: ActorSystem::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            samplers: Vec::new(),
            sample_armed: false,
            start_time: config.start_time,
            export_interval: config.export_interval,
            tally: Rc::new(RefCell::new(ConsumerTally::default())),
        };
        Self {
            scheduler: Scheduler::starting_at(config.start_time),
            config,
            world,
            wall_time: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn scheduler(&self) -> &Scheduler<SimEvent<M>> {
        &self.scheduler
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.world.graph
    }

    pub fn actors(&self) -> &ActorSystem<M> {
        &self.world.actors
    }

    /// The run's random generator, seeded from the configuration.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.world.rng
    }

    /// A kernel view for setting up the model outside of a callback.
    pub fn kernel(&mut self) -> Kernel<'_, M> {
        self.world.kernel(&mut self.scheduler)
    }

    /// Schedules a closure at `at`.
    pub fn schedule_at(&mut self, at: SimTime, f: impl FnOnce(&mut Kernel<'_, M>) + 'static) -> EventHandle {
        self.kernel().schedule_at(at, f)
    }

    /// Cancels a scheduled closure or any other pending event.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.scheduler.cancel(handle)
    }

    /// Hosts `consumer` in a new stage fed by `outlet`.
    pub fn attach_consumer<C>(&mut self, name: impl Into<String>, consumer: C, outlet: OutletId) -> StageId
    where
        C: ResourceConsumer + 'static,
    {
        self.kernel().attach_consumer(name, consumer, outlet)
    }

    pub fn spawn(&mut self, name: impl Into<String>, behavior: Behavior<M>) -> ActorId {
        self.kernel().spawn(name, behavior)
    }

    pub fn tell(&mut self, to: ActorId, message: M) {
        self.kernel().tell(to, message);
    }

    /// Registers a telemetry sampler, called every export interval while
    /// other work is pending.
    pub fn add_sampler(&mut self, sampler: impl FnMut(SimTime, &FlowGraph) + 'static) {
        if self.config.export_interval.is_none() {
            tracing::warn!("sampler registered with telemetry export disabled");
        }
        self.world.samplers.push(Box::new(sampler));
    }

    /// Processes a single event. Returns whether more events remain.
    pub fn step(&mut self) -> bool {
        self.world.arm_samples(&mut self.scheduler);
        self.scheduler.advance(&mut self.world)
    }

    /// Runs under `budget` and summarizes the simulation so far.
    pub fn run(&mut self, budget: RunBudget) -> RunSummary {
        let started = Instant::now();
        tracing::info!(now = self.scheduler.now(), pending = self.scheduler.len(), "simulation run started");

        self.world.arm_samples(&mut self.scheduler);
        let outcome = self.scheduler.run(&mut self.world, budget);
        self.wall_time += started.elapsed();

        let summary = RunSummary::from_stats(&self.stats(), outcome.reason);
        tracing::info!(
            final_time = summary.final_time,
            events = outcome.events,
            reason = ?outcome.reason,
            exited = summary.consumers_exited,
            failed = summary.consumers_failed,
            "simulation run finished"
        );
        summary
    }

    /// Runs until `time` (inclusive).
    pub fn run_until(&mut self, time: SimTime) -> RunSummary {
        self.run(RunBudget::until(time))
    }

    /// Runs until no events remain.
    pub fn run_until_idle(&mut self) -> RunSummary {
        self.run(RunBudget::until_idle())
    }

    /// Snapshot of every counter.
    pub fn stats(&self) -> KernelStats {
        let now = self.scheduler.now();
        let mut stats = KernelStats {
            now,
            scheduler: SchedulerStats {
                events_fired: self.scheduler.events_fired(),
                events_cancelled: self.scheduler.events_cancelled(),
                pending: self.scheduler.len(),
            },
            flow: FlowStats {
                stages: self.world.graph.len(),
                updates: self.world.graph.updates(),
                stale_wakes: self.world.graph.stale_wakes(),
            },
            actors: self.world.actors.stats(),
            consumers: self.world.tally.borrow().clone(),
            ..KernelStats::default()
        };
        stats.compute_timing(
            self.wall_time.as_secs_f64() * 1000.0,
            now.saturating_sub(self.config.start_time),
        );
        stats
    }
}

impl<M: Clone + 'static> Default for Simulation<M> {
    fn default() -> Self {
        Self::from_valid(KernelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{BoundedWork, TraceFragment, TraceReplay};
    use crate::registry::create_default_registry;
    use crate::scheduler::StopReason;
    use crate::stages::MaxMinSwitch;

    #[test]
    fn test_consumer_on_source() {
        let mut sim: Simulation<()> = Simulation::default();
        let cpu = sim.kernel().add_source("cpu", FlowSource::new(100.0));
        sim.attach_consumer("job", BoundedWork::new(1000.0, 0.5), cpu);

        let summary = sim.run_until_idle();

        assert_eq!(summary.final_time, 20_000);
        assert_eq!(summary.consumers_exited, 1);
        assert_eq!(summary.stop_reason, StopReason::Idle);
    }

    #[test]
    fn test_callbacks_share_the_kernel() {
        let mut sim: Simulation<u32> = Simulation::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();

        sim.schedule_at(10, move |kernel| {
            let now = kernel.now();
            log.borrow_mut().push(now);
            let log = log.clone();
            kernel.schedule_at(now + 5, move |kernel| log.borrow_mut().push(kernel.now()));
        });
        sim.run_until_idle();

        assert_eq!(*seen.borrow(), vec![10, 15]);
    }

    #[test]
    fn test_cancelled_callback_does_not_run() {
        let mut sim: Simulation<()> = Simulation::default();
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();

        let handle = sim.schedule_at(10, move |_| *flag.borrow_mut() = true);
        assert!(sim.cancel(handle));
        sim.run_until_idle();

        assert!(!*ran.borrow());
    }

    #[test]
    fn test_sampler_stops_with_the_work() {
        let config = KernelConfig {
            export_interval: Some(1_000),
            ..KernelConfig::default()
        };
        let mut sim: Simulation<()> = Simulation::new(config).unwrap();
        let cpu = sim.kernel().add_source("cpu", FlowSource::new(1.0));
        sim.attach_consumer("trace", TraceReplay::new([TraceFragment::new(3_500, 1.0)]), cpu);

        let samples = Rc::new(RefCell::new(Vec::new()));
        let sink = samples.clone();
        sim.add_sampler(move |now, _graph| sink.borrow_mut().push(now));

        sim.run_until_idle();

        // The sample armed while the trace was still running fires once
        // more after it ends, then sampling stops.
        assert_eq!(*samples.borrow(), vec![1_000, 2_000, 3_000, 4_000]);
        assert_eq!(sim.stats().consumers.exited, 1);
        assert!(sim.scheduler().is_empty());
    }

    #[test]
    fn test_run_until_keeps_pending_work() {
        let mut sim: Simulation<()> = Simulation::default();
        let cpu = sim.kernel().add_source("cpu", FlowSource::new(10.0));
        sim.attach_consumer("job", BoundedWork::new(100.0, 1.0), cpu);

        let summary = sim.run_until(4_000);
        assert_eq!(summary.stop_reason, StopReason::TimeLimit);
        assert_eq!(summary.final_time, 4_000);
        assert_eq!(sim.stats().consumers.running(), 1);

        let summary = sim.run_until_idle();
        assert_eq!(summary.final_time, 10_000);
        assert_eq!(summary.consumers_exited, 1);
    }

    #[test]
    fn test_attach_workload_from_registry() {
        let mut sim: Simulation<()> = Simulation::default();
        let registry = create_default_registry();
        let cpu = sim.kernel().add_source("cpu", FlowSource::new(4.0));
        let mux = sim.kernel().add_stage("mux", MaxMinSwitch::new());
        let mux_in = sim.kernel().graph.add_inlet(mux);
        sim.kernel().connect(cpu, mux_in);

        let spec = WorkloadSpec::new("work").with_attr("work", "8");
        let out = sim.kernel().graph.add_outlet(mux);
        assert!(sim.kernel().attach_workload("a", &registry, &spec, out).is_ok());
        let out = sim.kernel().graph.add_outlet(mux);
        assert!(sim.kernel().attach_workload("b", &registry, &spec, out).is_ok());

        let out = sim.kernel().graph.add_outlet(mux);
        let unknown = sim.kernel().attach_workload("c", &registry, &WorkloadSpec::new("gpu"), out);
        assert!(unknown.is_err());

        // Two tasks of 8 units share 4 units/s: both finish after 4 s.
        let summary = sim.run_until_idle();
        assert_eq!(summary.final_time, 4_000);
        assert_eq!(summary.consumers_exited, 2);
    }

    #[test]
    fn test_same_seed_same_numbers() {
        use rand::Rng;

        let config = KernelConfig {
            seed: 99,
            ..KernelConfig::default()
        };
        let mut a: Simulation<()> = Simulation::new(config.clone()).unwrap();
        let mut b: Simulation<()> = Simulation::new(config).unwrap();

        let xs: Vec<u32> = (0..8).map(|_| a.rng().gen()).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.rng().gen()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = KernelConfig {
            utilization_cap: 0.0,
            ..KernelConfig::default()
        };
        assert!(Simulation::<()>::new(config).is_err());
    }
}
