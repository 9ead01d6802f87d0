//! Integration tests for the resource-flow graph.
//!
//! The graph is driven directly by a `Scheduler<StageWake>`, the way an
//! embedding without actors would run it.

use dcsim::consumer::{BoundedWork, ConsumerContext, ConsumerOutcome, NextAction, ResourceConsumer};
use dcsim::flow::{FlowGraph, StageWake};
use dcsim::scheduler::{RunBudget, Scheduler};
use dcsim::stages::{ConsumerStage, FlowSource, MaxMinSwitch};
use dcsim::types::{InletId, OutletId, SimTime, StageId, IDLE};
use dcsim::{ConsumerError, Event};

// ============================================================================
// Helpers
// ============================================================================

/// Requests a fixed rate forever.
struct Constant(f64);

impl ResourceConsumer for Constant {
    fn on_next(&mut self, _ctx: &ConsumerContext, _now: SimTime, _delta: SimTime) -> Result<NextAction, ConsumerError> {
        Ok(NextAction::consume(self.0, IDLE))
    }
}

struct Rig {
    scheduler: Scheduler<StageWake>,
    graph: FlowGraph,
    source: StageId,
    switch: StageId,
}

impl Rig {
    /// A source of `capacity` feeding a max-min switch.
    fn new(capacity: f64) -> Self {
        let mut scheduler = Scheduler::new();
        let mut graph = FlowGraph::new();
        let (source, outlet) = FlowSource::new(capacity).install(&mut graph, "cpu");
        let switch = graph.add_stage("mux", MaxMinSwitch::new());
        let inlet = graph.add_inlet(switch);
        graph.connect(&mut scheduler, outlet, inlet);
        Self {
            scheduler,
            graph,
            source,
            switch,
        }
    }

    /// Hosts `consumer` behind a new switch outlet.
    fn attach<C: ResourceConsumer + 'static>(&mut self, name: &str, consumer: C) -> (StageId, OutletId, InletId) {
        let outlet = self.graph.add_outlet(self.switch);
        let (stage, inlet) = ConsumerStage::new(consumer).install(&mut self.graph, name);
        self.graph.connect(&mut self.scheduler, outlet, inlet);
        (stage, outlet, inlet)
    }

    fn rate(&self, inlet: InletId) -> f64 {
        self.graph.inlet(inlet).map_or(f64::NAN, |view| view.rate)
    }

    fn run_with(&mut self, budget: RunBudget) {
        let graph = &mut self.graph;
        self.scheduler.run(
            &mut |s: &mut Scheduler<StageWake>, event: Event<StageWake>| graph.on_wake(s, event.payload),
            budget,
        );
    }

    fn run(&mut self) {
        self.run_with(RunBudget::until_idle());
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_max_min_rates_through_switch() {
    let mut rig = Rig::new(10.0);
    let (_, _, small) = rig.attach("small", Constant(2.0));
    let (_, _, medium) = rig.attach("medium", Constant(5.0));
    let (_, _, large) = rig.attach("large", Constant(8.0));

    assert!(close(rig.rate(small), 2.0));
    assert!(close(rig.rate(medium), 4.0));
    assert!(close(rig.rate(large), 4.0));

    let reading = rig.graph.stage::<FlowSource>(rig.source).unwrap().reading_at(0);
    assert!(close(reading.demand, 10.0));
    assert!(close(reading.rate, 10.0));
    // Nothing is time-driven: the graph is quiescent.
    assert!(rig.scheduler.is_empty());
}

#[test]
fn test_demand_change_reallocates() {
    let mut rig = Rig::new(10.0);
    let (_, _, small) = rig.attach("small", Constant(2.0));
    let (medium_id, _, medium) = rig.attach("medium", Constant(5.0));
    let (_, _, large) = rig.attach("large", Constant(8.0));

    let updated = rig
        .graph
        .update_stage(&mut rig.scheduler, medium_id, |stage: &mut ConsumerStage<Constant>| {
            stage.consumer_mut().0 = 1.0;
        });
    assert!(updated.is_some());

    assert!(close(rig.rate(small), 2.0));
    assert!(close(rig.rate(medium), 1.0));
    assert!(close(rig.rate(large), 7.0));
}

#[test]
fn test_disconnect_releases_share() {
    let mut rig = Rig::new(10.0);
    let (_, _, small) = rig.attach("small", Constant(2.0));
    let (_, _, medium) = rig.attach("medium", Constant(5.0));
    let (_, large_out, large) = rig.attach("large", Constant(8.0));

    assert!(rig.graph.disconnect(&mut rig.scheduler, large_out));
    assert!(!rig.graph.disconnect(&mut rig.scheduler, large_out));

    assert!(close(rig.rate(small), 2.0));
    assert!(close(rig.rate(medium), 5.0));
    let view = rig.graph.inlet(large).unwrap();
    assert!(!view.connected);
    assert_eq!(view.capacity, 0.0);
    assert_eq!(view.rate, 0.0);

    let switch = rig.graph.stage::<MaxMinSwitch>(rig.switch).unwrap();
    assert!(close(switch.demand(), 7.0));
}

#[test]
fn test_removed_consumer_frees_capacity_and_its_wake_is_stale() {
    let mut rig = Rig::new(10.0);
    let (a, _, _) = rig.attach("a", BoundedWork::new(100.0, 1.0));
    let (b, _, b_in) = rig.attach("b", BoundedWork::new(100.0, 1.0));
    assert!(close(rig.rate(b_in), 5.0));
    assert_eq!(rig.graph.deadline(a), Some(20_000));

    let removed = rig.graph.remove_stage(&mut rig.scheduler, a);
    assert!(removed.is_some());
    assert!(!rig.graph.contains(a));
    assert!(close(rig.rate(b_in), 10.0));
    assert_eq!(rig.graph.deadline(b), Some(10_000));

    rig.run();

    let stage = rig.graph.stage::<ConsumerStage<BoundedWork>>(b).unwrap();
    assert_eq!(stage.outcome().map(ConsumerOutcome::at), Some(10_000));
    // The wake-up queued for `a` still arrived and was dropped.
    assert_eq!(rig.graph.stale_wakes(), 1);
    assert_eq!(rig.scheduler.now(), 20_000);
}

#[test]
fn test_capacity_change_on_source() {
    let mut rig = Rig::new(10.0);
    let (task, _, inlet) = rig.attach("task", BoundedWork::new(100.0, 1.0));
    assert_eq!(rig.graph.deadline(task), Some(10_000));

    // Halfway through, the resource slows down to a fifth.
    rig.run_with(RunBudget::until(5_000));
    assert_eq!(rig.scheduler.now(), 5_000);
    let source = rig.source;
    rig.graph
        .update_stage(&mut rig.scheduler, source, |stage: &mut FlowSource| stage.set_capacity(2.0));
    assert!(close(rig.rate(inlet), 2.0));

    rig.run();

    // 50 units at 10/s, then 50 units at 2/s.
    let stage = rig.graph.stage::<ConsumerStage<BoundedWork>>(task).unwrap();
    assert_eq!(stage.outcome().map(ConsumerOutcome::at), Some(30_000));
    assert!(close(stage.consumed(), 100.0));
}

#[test]
fn test_many_consumers_never_exceed_capacity() {
    let mut rig = Rig::new(64.0);
    let inlets: Vec<InletId> = (1..=20)
        .map(|i| rig.attach(&format!("c{i}"), Constant(i as f64)).2)
        .collect();

    let total: f64 = inlets.iter().map(|&inlet| rig.rate(inlet)).sum();
    assert!(total <= 64.0 + 1e-6);
    assert!(close(total, 64.0));

    // Nobody gets more than asked, and a consumer below the fair level gets
    // all of its demand.
    for (i, &inlet) in inlets.iter().enumerate() {
        let demand = (i + 1) as f64;
        assert!(rig.rate(inlet) <= demand + 1e-9);
    }
    assert!(close(rig.rate(inlets[0]), 1.0));
}
